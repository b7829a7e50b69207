//! Orchestrator - runs an install plan unit by unit.
//!
//! ```text
//! units (declared order) ──▶ target ──▶ post-target units
//!        │ any failure
//!        └──────────────▶ everything after it: not run
//! ```
//!
//! The summary is always produced, whether the plan succeeded or not. The
//! process exit status is derived from it, not the other way around.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;

use crate::error::{PlanAborted, PlanError};
use crate::step::Step;
use crate::target::TargetBuilder;
use crate::timing::{format_duration, Timer};
use crate::unit::{DependencyUnit, Failure, UnitOutcome, UnitRunner};

/// Lines of captured stderr shown per failure in the printed summary.
const STDERR_TAIL_LINES: usize = 20;

/// Units to install, the target they gate, and units repeated afterwards.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub units: Vec<DependencyUnit>,
    pub target: Option<TargetBuilder>,
    pub post_target: Vec<DependencyUnit>,
}

impl InstallPlan {
    pub fn new(
        units: Vec<DependencyUnit>,
        target: Option<TargetBuilder>,
        post_target: Vec<DependencyUnit>,
    ) -> Result<Self, PlanError> {
        let plan = Self {
            units,
            target,
            post_target,
        };
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::new();
        for name in self.names() {
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(PlanError::DuplicateUnit(name.to_string()));
            }
        }
        self.units
            .iter()
            .chain(&self.post_target)
            .try_for_each(DependencyUnit::validate)?;
        if let Some(target) = &self.target {
            target.validate()?;
        }
        Ok(())
    }

    /// Unit names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .map(|u| u.name.as_str())
            .chain(self.target.iter().map(|t| t.name.as_str()))
            .chain(self.post_target.iter().map(|u| u.name.as_str()))
    }

    /// Every step in execution order, tagged with its unit name.
    pub fn all_steps(&self) -> impl Iterator<Item = (&str, &Step)> {
        let units = self
            .units
            .iter()
            .flat_map(|u| u.steps.iter().map(move |s| (u.name.as_str(), s)));
        let target = self
            .target
            .iter()
            .flat_map(|t| t.steps().map(move |(_, s)| (t.name.as_str(), s)));
        let post = self
            .post_target
            .iter()
            .flat_map(|u| u.steps.iter().map(move |s| (u.name.as_str(), s)));
        units.chain(target).chain(post)
    }

    /// Narrow the plan to a single unit (case-insensitive). Naming the target
    /// keeps only the target.
    pub fn only(self, name: &str) -> Result<Self, PlanError> {
        let wanted = name.to_ascii_lowercase();
        let is_named = |n: &str| n.to_ascii_lowercase() == wanted;

        if self.target.as_ref().is_some_and(|t| is_named(&t.name)) {
            return Ok(Self {
                units: Vec::new(),
                target: self.target,
                post_target: Vec::new(),
            });
        }

        let available = self.names().collect::<Vec<_>>().join(", ");
        let unit = self
            .units
            .into_iter()
            .chain(self.post_target)
            .find(|u| is_named(&u.name))
            .ok_or_else(|| PlanError::UnknownUnit {
                name: name.to_string(),
                available,
            })?;

        Ok(Self {
            units: vec![unit],
            target: None,
            post_target: Vec::new(),
        })
    }
}

/// Position of a unit in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Prerequisite,
    Target,
    PostTarget,
}

/// One line of the summary.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub name: String,
    pub role: Role,
    pub outcome: UnitOutcome,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Cumulative status of a run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub units: Vec<UnitReport>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.units.iter().all(|u| u.outcome.is_success())
    }

    pub fn outcome(&self, name: &str) -> Option<&UnitOutcome> {
        self.units.iter().find(|u| u.name == name).map(|u| &u.outcome)
    }

    /// The unit that halted the plan, with its failure.
    pub fn first_failure(&self) -> Option<(&UnitReport, &Failure)> {
        self.units
            .iter()
            .find_map(|u| u.outcome.failure().map(|f| (u, f)))
    }

    pub fn interrupted(&self) -> bool {
        self.first_failure().is_some_and(|(_, f)| f.is_interrupt())
    }

    /// Error describing the first failure, `None` on success.
    pub fn aborted(&self) -> Option<PlanAborted> {
        self.first_failure().map(|(unit, failure)| PlanAborted {
            unit: unit.name.clone(),
            step: failure.step.clone(),
            step_index: failure.step_index,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Print the summary to stdout.
    pub fn print(&self) {
        println!("\n=== Install Summary ===\n");

        for report in &self.units {
            let icon = match &report.outcome {
                UnitOutcome::Succeeded { .. } => "✓",
                UnitOutcome::Skipped => "○",
                UnitOutcome::Failed(_) => "✗",
                UnitOutcome::NotRun => "-",
            };
            print!("  {} {}: {}", icon, report.name, report.outcome);
            if matches!(report.outcome, UnitOutcome::Succeeded { .. } | UnitOutcome::Failed(_)) {
                print!(" [{}]", format_duration(report.elapsed));
            }
            println!();

            if let Some(failure) = report.outcome.failure() {
                println!("      {}", failure.message);
                if let Some(stderr) = failure.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
                    println!("      stderr (last {} lines):", STDERR_TAIL_LINES);
                    for line in tail(stderr, STDERR_TAIL_LINES) {
                        println!("        {}", line);
                    }
                }
            }
        }

        println!();
        let done = self.units.iter().filter(|u| u.outcome.is_success()).count();
        println!("Summary: {}/{} units succeeded or already satisfied", done, self.units.len());
        match self.first_failure() {
            None => println!("Result: SUCCESS"),
            Some((unit, failure)) => {
                let area = failure
                    .area
                    .as_deref()
                    .map(|a| format!(" ({})", a))
                    .unwrap_or_default();
                println!(
                    "Result: FAILED - {}{} stopped at step {} '{}'",
                    unit.name, area, failure.step_index, failure.step
                );
            }
        }
    }
}

fn tail(text: &str, n: usize) -> impl Iterator<Item = &str> {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let skip = lines.len().saturating_sub(n);
    lines.into_iter().skip(skip)
}

/// Runs a plan through a [`UnitRunner`].
pub struct Orchestrator<'a> {
    runner: UnitRunner<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(runner: UnitRunner<'a>) -> Self {
        Self { runner }
    }

    /// Run every unit in order, halting at the first failure.
    pub fn run(&self, plan: &InstallPlan) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut halted = false;

        for unit in &plan.units {
            halted = self.record(&mut summary, &unit.name, Role::Prerequisite, halted, || {
                self.runner.run(unit)
            });
        }

        if let Some(target) = &plan.target {
            halted = self.record(&mut summary, &target.name, Role::Target, halted, || {
                target.run(&self.runner)
            });
        }

        for unit in &plan.post_target {
            halted = self.record(&mut summary, &unit.name, Role::PostTarget, halted, || {
                self.runner.run(unit)
            });
        }

        summary
    }

    /// Run one unit unless the plan already halted. Returns the new halted state.
    fn record(
        &self,
        summary: &mut RunSummary,
        name: &str,
        role: Role,
        halted: bool,
        run: impl FnOnce() -> UnitOutcome,
    ) -> bool {
        let (outcome, elapsed) = if halted {
            tracing::info!(unit = %name, "not run, plan halted");
            (UnitOutcome::NotRun, Duration::ZERO)
        } else {
            let timer = Timer::start(name);
            let outcome = run();
            (outcome, timer.finish())
        };

        let failed = !outcome.is_success();
        if failed && !halted {
            tracing::error!(unit = %name, "{}; halting plan", outcome);
        }

        summary.units.push(UnitReport {
            name: name.to_string(),
            role,
            outcome,
            elapsed,
        });
        halted || failed
    }
}
