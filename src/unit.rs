//! Dependency units and the unit runner.
//!
//! A unit is an ordered pipeline of steps (fetch, configure, build, verify,
//! install, refresh linker cache) plus a predicate saying whether its effects
//! are already present. The runner either skips the unit, runs every step, or
//! stops at the first failing step. Later steps never run after a failure.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::{PlanError, StepError};
use crate::executor::StepExecutor;
use crate::process::Cmd;
use crate::step::Step;

/// Predicate deciding whether a unit's effects are already on the machine.
#[derive(Clone)]
pub enum Satisfied {
    /// Always install.
    Never,
    PathExists(PathBuf),
    /// The probe command exits zero.
    CommandSucceeds(Vec<String>),
    /// The probe command exits zero and its output contains `needle`.
    OutputContains { command: Vec<String>, needle: String },
    All(Vec<Satisfied>),
    Any(Vec<Satisfied>),
    Custom(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Satisfied {
    pub fn custom(f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Satisfied::Custom(Arc::new(f))
    }

    pub fn command<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Satisfied::CommandSucceeds(argv.into_iter().map(Into::into).collect())
    }

    pub fn evaluate(&self) -> bool {
        match self {
            Satisfied::Never => false,
            Satisfied::PathExists(path) => path.exists(),
            Satisfied::CommandSucceeds(argv) => probe(argv).is_some(),
            Satisfied::OutputContains { command, needle } => probe(command)
                .map(|out| out.contains(needle.as_str()))
                .unwrap_or(false),
            Satisfied::All(all) => all.iter().all(Satisfied::evaluate),
            Satisfied::Any(any) => any.iter().any(Satisfied::evaluate),
            Satisfied::Custom(f) => f(),
        }
    }
}

/// Combined stdout+stderr of a successful probe, `None` if it failed or
/// could not be spawned.
fn probe(argv: &[String]) -> Option<String> {
    let out = Cmd::from_argv(argv)?.allow_fail().run().ok()?;
    if !out.success() {
        return None;
    }
    Some(format!("{}{}", out.stdout, out.stderr))
}

impl fmt::Debug for Satisfied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Satisfied::Never => write!(f, "never"),
            Satisfied::PathExists(p) => write!(f, "exists({})", p.display()),
            Satisfied::CommandSucceeds(argv) => write!(f, "succeeds(`{}`)", argv.join(" ")),
            Satisfied::OutputContains { command, needle } => {
                write!(f, "`{}` mentions {:?}", command.join(" "), needle)
            }
            Satisfied::All(all) => {
                write!(f, "all")?;
                f.debug_list().entries(all).finish()
            }
            Satisfied::Any(any) => {
                write!(f, "any")?;
                f.debug_list().entries(any).finish()
            }
            Satisfied::Custom(_) => write!(f, "custom"),
        }
    }
}

/// The complete installation pipeline for one library.
#[derive(Debug, Clone)]
pub struct DependencyUnit {
    pub name: String,
    pub steps: Vec<Step>,
    pub already_satisfied: Satisfied,
}

impl DependencyUnit {
    pub fn new(name: impl Into<String>, steps: Vec<Step>, already_satisfied: Satisfied) -> Self {
        Self {
            name: name.into(),
            steps,
            already_satisfied,
        }
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::EmptyUnit(self.name.clone()));
        }
        self.steps.iter().try_for_each(Step::validate)
    }
}

/// Category of a step failure, as shown in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Environment,
    Execution,
    ExitStatus,
    Interrupted,
}

/// Where and why a unit stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Build area within the target, `None` for ordinary units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    /// 1-based position of the failing step.
    pub step_index: usize,
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl Failure {
    pub fn from_error(step_index: usize, err: &StepError) -> Self {
        let kind = match err {
            StepError::Environment { .. } => FailureKind::Environment,
            StepError::Execution { .. } => FailureKind::Execution,
            StepError::StepFailed { .. } => FailureKind::ExitStatus,
            StepError::Cancelled { .. } => FailureKind::Interrupted,
        };
        Self {
            area: None,
            step_index,
            step: err.step().to_string(),
            kind,
            message: err.to_string(),
            exit_code: err.exit_code(),
            stderr: err.captured_stderr().map(str::to_string),
        }
    }

    fn interrupted_before(step_index: usize, step: &Step, signal: i32) -> Self {
        Self {
            area: None,
            step_index,
            step: step.name.clone(),
            kind: FailureKind::Interrupted,
            message: format!("interrupted by signal {signal} before launch"),
            exit_code: None,
            stderr: None,
        }
    }

    pub fn in_area(mut self, area: &str) -> Self {
        self.area = Some(area.to_string());
        self
    }

    pub fn is_interrupt(&self) -> bool {
        self.kind == FailureKind::Interrupted
    }
}

/// Result of running (or not running) one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum UnitOutcome {
    Succeeded { steps_run: usize },
    /// Already satisfied; no steps executed.
    Skipped,
    Failed(Failure),
    /// Never started because the plan halted earlier.
    NotRun,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded { .. } | UnitOutcome::Skipped)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            UnitOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Succeeded { .. } => write!(f, "success"),
            UnitOutcome::Skipped => write!(f, "skipped (already satisfied)"),
            UnitOutcome::NotRun => write!(f, "not run"),
            UnitOutcome::Failed(failure) => {
                write!(f, "failed")?;
                if let Some(area) = &failure.area {
                    write!(f, " in {}", area)?;
                }
                write!(f, " at step {} ({})", failure.step_index, failure.step)?;
                match (failure.kind, failure.exit_code) {
                    (_, Some(code)) => write!(f, ", exit={}", code),
                    (FailureKind::Interrupted, None) => write!(f, ", interrupted"),
                    (FailureKind::Environment, None) => write!(f, ", missing directory"),
                    (FailureKind::Execution, None) => write!(f, ", could not launch"),
                    (FailureKind::ExitStatus, None) => Ok(()),
                }
            }
        }
    }
}

/// Run `steps` strictly in order, stopping at the first failure.
///
/// Returns the number of steps executed on success.
pub fn run_steps(
    steps: &[Step],
    executor: &dyn StepExecutor,
    cancel: &CancelToken,
) -> Result<usize, Failure> {
    for (i, step) in steps.iter().enumerate() {
        let index = i + 1;
        if let Some(signal) = cancel.signal() {
            return Err(Failure::interrupted_before(index, step, signal));
        }
        println!("  [{}/{}] {}", index, steps.len(), step.name);
        if let Err(err) = executor.execute(step) {
            tracing::error!("{err}");
            return Err(Failure::from_error(index, &err));
        }
    }
    Ok(steps.len())
}

/// Runs a single unit: skip if satisfied, otherwise execute its steps.
pub struct UnitRunner<'a> {
    executor: &'a dyn StepExecutor,
    cancel: &'a CancelToken,
    check_satisfied: bool,
}

impl<'a> UnitRunner<'a> {
    pub fn new(executor: &'a dyn StepExecutor, cancel: &'a CancelToken) -> Self {
        Self {
            executor,
            cancel,
            check_satisfied: true,
        }
    }

    /// When false, every unit runs even if its effects are present.
    pub fn check_satisfied(mut self, check: bool) -> Self {
        self.check_satisfied = check;
        self
    }

    pub fn check_enabled(&self) -> bool {
        self.check_satisfied
    }

    pub fn executor(&self) -> &'a dyn StepExecutor {
        self.executor
    }

    pub fn cancel_token(&self) -> &'a CancelToken {
        self.cancel
    }

    pub fn is_satisfied(&self, unit: &DependencyUnit) -> bool {
        if !self.check_satisfied {
            return false;
        }
        let satisfied = unit.already_satisfied.evaluate();
        tracing::debug!(unit = %unit.name, satisfied, "checked {:?}", unit.already_satisfied);
        satisfied
    }

    pub fn run(&self, unit: &DependencyUnit) -> UnitOutcome {
        if self.is_satisfied(unit) {
            println!("{} already satisfied, skipping", unit.name);
            tracing::info!(unit = %unit.name, "skipped");
            return UnitOutcome::Skipped;
        }

        println!("Installing {}...", unit.name);
        match run_steps(&unit.steps, self.executor, self.cancel) {
            Ok(steps_run) => UnitOutcome::Succeeded { steps_run },
            Err(failure) => UnitOutcome::Failed(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        ran: Mutex<Vec<String>>,
        fail: Option<&'static str>,
    }

    impl StepExecutor for Recorder {
        fn execute(&self, step: &Step) -> Result<ExecutionResult, StepError> {
            self.ran.lock().unwrap().push(step.name.clone());
            if self.fail == Some(step.name.as_str()) {
                return Err(exit_one(&step.name));
            }
            Ok(ExecutionResult {
                step_name: step.name.clone(),
                exit_status: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn exit_one(step: &str) -> StepError {
        StepError::StepFailed {
            step: step.to_string(),
            code: 1,
            stderr: "boom".into(),
        }
    }

    fn unit(names: &[&str], satisfied: Satisfied) -> DependencyUnit {
        let steps = names.iter().map(|n| Step::new(*n, "/tmp", ["true"])).collect();
        DependencyUnit::new("lib", steps, satisfied)
    }

    #[test]
    fn test_satisfied_unit_runs_nothing() {
        let rec = Recorder::default();
        let cancel = CancelToken::new();
        let satisfied = unit(&["a", "b"], Satisfied::custom(|| true));
        let outcome = UnitRunner::new(&rec, &cancel).run(&satisfied);
        assert_eq!(outcome, UnitOutcome::Skipped);
        assert!(rec.ran.lock().unwrap().is_empty());
    }

    #[test]
    fn test_skip_check_disabled_runs_anyway() {
        let rec = Recorder::default();
        let cancel = CancelToken::new();
        let outcome = UnitRunner::new(&rec, &cancel)
            .check_satisfied(false)
            .run(&unit(&["a"], Satisfied::custom(|| true)));
        assert_eq!(outcome, UnitOutcome::Succeeded { steps_run: 1 });
    }

    #[test]
    fn test_failure_stops_later_steps() {
        let rec = Recorder {
            fail: Some("configure"),
            ..Default::default()
        };
        let cancel = CancelToken::new();
        let outcome = UnitRunner::new(&rec, &cancel)
            .run(&unit(&["fetch", "configure", "make", "make check"], Satisfied::Never));
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.step_index, 2);
        assert_eq!(failure.kind, FailureKind::ExitStatus);
        assert_eq!(failure.stderr.as_deref(), Some("boom"));
        assert_eq!(*rec.ran.lock().unwrap(), vec!["fetch", "configure"]);
    }

    #[test]
    fn test_cancelled_token_launches_nothing() {
        let rec = Recorder::default();
        let cancel = CancelToken::new();
        cancel.cancel(2);
        let outcome = UnitRunner::new(&rec, &cancel).run(&unit(&["a", "b"], Satisfied::Never));
        assert!(outcome.failure().unwrap().is_interrupt());
        assert!(rec.ran.lock().unwrap().is_empty());
    }

    #[test]
    fn test_validate_empty_unit() {
        let u = DependencyUnit::new("empty", Vec::new(), Satisfied::Never);
        assert_eq!(u.validate(), Err(PlanError::EmptyUnit("empty".into())));
    }

    #[test]
    fn test_predicates() {
        assert!(!Satisfied::Never.evaluate());
        assert!(Satisfied::PathExists("/".into()).evaluate());
        assert!(Satisfied::command(["true"]).evaluate());
        assert!(!Satisfied::command(["false"]).evaluate());
        assert!(!Satisfied::command(["no-such-probe-12345"]).evaluate());
        assert!(Satisfied::OutputContains {
            command: vec!["echo".into(), "libprotoc 3.2.0".into()],
            needle: "3.2.0".into(),
        }
        .evaluate());
        assert!(Satisfied::Any(vec![Satisfied::Never, Satisfied::command(["true"])]).evaluate());
        assert!(!Satisfied::All(vec![Satisfied::Never, Satisfied::command(["true"])]).evaluate());
    }

    #[test]
    fn test_outcome_display() {
        let failed = UnitOutcome::Failed(Failure::from_error(4, &exit_one("make check")));
        assert_eq!(failed.to_string(), "failed at step 4 (make check), exit=1");
        assert_eq!(UnitOutcome::Succeeded { steps_run: 3 }.to_string(), "success");
    }
}
