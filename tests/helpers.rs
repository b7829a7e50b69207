//! Shared test utilities for microsuite-setup tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use microsuite_setup::cancel::CancelToken;
use microsuite_setup::{
    BuildArea, DependencyUnit, ExecutionResult, InstallPlan, Orchestrator, RunSummary, Satisfied,
    Step, StepError, StepExecutor, TargetBuilder, UnitRunner,
};

/// Executor that records every step it is asked to run and never spawns
/// anything. Steps named in `failures` exit with the given code.
#[derive(Default)]
pub struct SpyExecutor {
    log: Mutex<Vec<String>>,
    failures: HashMap<String, i32>,
    /// Cancel this token when the named step runs.
    cancel_at: Option<(String, CancelToken)>,
}

impl SpyExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `unit/step` fail with `code`.
    pub fn failing(mut self, unit: &str, step: &str, code: i32) -> Self {
        self.failures.insert(format!("{}/{}", unit, step), code);
        self
    }

    pub fn cancelling_at(mut self, unit: &str, step: &str, token: &CancelToken) -> Self {
        self.cancel_at = Some((format!("{}/{}", unit, step), token.clone()));
        self
    }

    /// `unit/step` keys in execution order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Steps executed for one unit, in order.
    pub fn steps_of(&self, unit: &str) -> Vec<String> {
        let prefix = format!("{}/", unit);
        self.log()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl StepExecutor for SpyExecutor {
    fn execute(&self, step: &Step) -> Result<ExecutionResult, StepError> {
        // Test steps carry their unit name as the working directory.
        let key = format!("{}/{}", step.working_directory.display(), step.name);
        self.log.lock().unwrap().push(key.clone());

        if let Some((at, token)) = &self.cancel_at {
            if *at == key {
                token.cancel(2);
                return Err(StepError::Cancelled {
                    step: step.name.clone(),
                    signal: 2,
                });
            }
        }

        if let Some(code) = self.failures.get(&key) {
            return Err(StepError::StepFailed {
                step: step.name.clone(),
                code: *code,
                stderr: format!("{} failed\n", step.name),
            });
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

/// A unit whose steps run "in" a directory named after the unit, so the spy
/// can tell units apart.
pub fn unit(name: &str, steps: &[&str], satisfied: bool) -> DependencyUnit {
    let steps = steps
        .iter()
        .map(|s| Step::new(*s, name, ["true"]))
        .collect();
    let predicate = if satisfied {
        Satisfied::custom(|| true)
    } else {
        Satisfied::Never
    };
    DependencyUnit::new(name, steps, predicate)
}

/// A unit whose predicate reads the returned flag. Set it to simulate the
/// library being present on the machine.
pub fn installable_unit(name: &str, steps: &[&str]) -> (DependencyUnit, Arc<AtomicBool>) {
    let installed = Arc::new(AtomicBool::new(false));
    let flag = installed.clone();
    let mut unit = unit(name, steps, false);
    unit.already_satisfied = Satisfied::custom(move || flag.load(Ordering::SeqCst));
    (unit, installed)
}

/// Target with three areas, mirroring the HDSearch layout.
pub fn target(name: &str) -> TargetBuilder {
    let area = |area: &str, steps: &[&str]| BuildArea {
        name: area.to_string(),
        steps: steps.iter().map(|s| Step::new(*s, name, ["true"])).collect(),
    };
    TargetBuilder::new(
        name,
        vec![
            area("mid_tier_service", &["cmake ..", "make", "make install"]),
            area("protoc_files", &["make protoc"]),
            area("bucket_service/service", &["make bucket"]),
        ],
    )
}

pub fn plan(units: Vec<DependencyUnit>, target: Option<TargetBuilder>) -> InstallPlan {
    InstallPlan::new(units, target, Vec::new()).expect("valid plan")
}

/// Run `plan` through `spy` with satisfaction checks enabled.
pub fn run(spy: &SpyExecutor, plan: &InstallPlan) -> RunSummary {
    let cancel = CancelToken::new();
    run_with(spy, plan, &cancel)
}

pub fn run_with(spy: &SpyExecutor, plan: &InstallPlan, cancel: &CancelToken) -> RunSummary {
    Orchestrator::new(UnitRunner::new(spy, cancel)).run(plan)
}

pub fn assert_dir_exists(path: &Path) {
    assert!(path.is_dir(), "Directory should exist: {}", path.display());
}
