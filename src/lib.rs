//! MicroSuite setup library exports.
//!
//! The binary is a thin CLI over these modules. Integration tests drive the
//! orchestrator through a recording [`executor::StepExecutor`].

pub mod cancel;
pub mod commands;
pub mod config;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod preflight;
pub mod privilege;
pub mod process;
pub mod step;
pub mod target;
pub mod timing;
pub mod unit;

pub use error::{PlanAborted, PlanError, StepError};
pub use executor::{ExecutionResult, StepExecutor, SystemExecutor};
pub use orchestrator::{InstallPlan, Orchestrator, RunSummary};
pub use step::Step;
pub use target::{BuildArea, Service, TargetBuilder};
pub use unit::{DependencyUnit, Satisfied, UnitOutcome, UnitRunner};
