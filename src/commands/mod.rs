//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `install` - Run the install plan (default)
//! - `preflight` - Run preflight checks
//! - `show` - Display the plan or configuration

pub mod install;
mod preflight;
pub mod show;

pub use install::cmd_install;
pub use preflight::cmd_preflight;
pub use show::cmd_show;
