//! Install command - runs the install plan.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cancel::{self, CancelToken};
use crate::config::Config;
use crate::definitions;
use crate::executor::SystemExecutor;
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::unit::UnitRunner;

use super::show::print_plan;

/// Flags for the install command.
#[derive(Debug, Default, Clone)]
pub struct InstallOptions {
    /// Run a single unit (or the target) instead of the full plan.
    pub only: Option<String>,
    /// Run units even if their effects are already present.
    pub skip_satisfied_check: bool,
    /// Print planned steps without executing anything.
    pub dry_run: bool,
    /// Echo child output live.
    pub stream: bool,
    pub parallel_areas: bool,
    /// Don't repeat OpenSSL and MKL after the target.
    pub no_repeat: bool,
    pub summary_json: Option<PathBuf>,
}

/// Execute the install command.
pub fn cmd_install(config: &Config, opts: &InstallOptions) -> Result<()> {
    let mut config = config.clone();
    config.parallel_areas |= opts.parallel_areas;
    if opts.no_repeat {
        config.repeat_after_target = false;
    }

    let mut plan = definitions::install_plan(&config).context("Invalid install plan")?;
    if let Some(name) = &opts.only {
        plan = plan.only(name)?;
    }

    if opts.dry_run {
        print_plan(&plan, !opts.skip_satisfied_check);
        println!("Dry run: no commands were executed.");
        return Ok(());
    }

    println!("=== MicroSuite Setup: {} ===\n", config.service);
    tracing::info!(service = %config.service, elevation = %config.elevation, "starting install");

    let cancel = CancelToken::new();
    cancel::listen_for_signals(cancel.clone())?;

    let executor =
        SystemExecutor::new(config.elevation.clone(), cancel.clone()).streaming(opts.stream);
    let runner = UnitRunner::new(&executor, &cancel).check_satisfied(!opts.skip_satisfied_check);
    let summary = Orchestrator::new(runner).run(&plan);

    summary.print();
    if let Some(path) = &opts.summary_json {
        write_summary(&summary, path)?;
    }

    finish(&summary)
}

fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = summary.to_json().context("Failed to serialize summary")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Summary written to {}", path.display());
    Ok(())
}

/// Turn the summary into the command's result.
pub fn finish(summary: &RunSummary) -> Result<()> {
    match summary.aborted() {
        None => Ok(()),
        Some(aborted) if summary.interrupted() => {
            bail!(
                "Interrupted by operator ({}). Re-run to continue; satisfied units are skipped.",
                aborted
            )
        }
        Some(aborted) => Err(aborted.into()),
    }
}
