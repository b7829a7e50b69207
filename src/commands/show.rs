//! Show command - displays the plan or configuration.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::definitions;
use crate::orchestrator::InstallPlan;
use crate::step::Step;
use crate::unit::DependencyUnit;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show every unit and step in execution order
    Plan,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Plan => {
            let plan = definitions::install_plan(config).context("Invalid install plan")?;
            print_plan(&plan, false);
        }
    }
    Ok(())
}

/// Print the plan. With `check_satisfied`, each unit's predicate is probed so
/// the listing shows which units a real run would skip.
pub fn print_plan(plan: &InstallPlan, check_satisfied: bool) {
    println!("=== Install Plan ===\n");

    for unit in &plan.units {
        print_unit(unit, "", check_satisfied);
    }

    if let Some(target) = &plan.target {
        let mode = if target.parallel { "parallel areas" } else { "sequential areas" };
        println!("{} (target, {})", target.name, mode);
        for area in &target.areas {
            println!("  {}", area.name);
            print_steps(&area.steps, "    ");
        }
        println!();
    }

    for unit in &plan.post_target {
        print_unit(unit, " (after target)", check_satisfied);
    }
}

fn print_unit(unit: &DependencyUnit, suffix: &str, check_satisfied: bool) {
    let status = if !check_satisfied {
        String::new()
    } else if unit.already_satisfied.evaluate() {
        "  [satisfied - would skip]".to_string()
    } else {
        "  [would run]".to_string()
    };
    println!("{}{}{}", unit.name, suffix, status);
    print_steps(&unit.steps, "  ");
    println!();
}

fn print_steps(steps: &[Step], indent: &str) {
    for (i, step) in steps.iter().enumerate() {
        println!("{}{}. {}: {}", indent, i + 1, step.name, step);
    }
}
