//! Display utilities for the snapferry CLI

use console::style;
use snapferry_engine::{ChainState, RunSummary};
use snapferry_sync::Plan;
use snapferry_types::{PlanFailure, ReplicationStep};
use std::time::Duration;

/// Line printed after the planning failures of an aborted run
pub const ABORT_MESSAGE: &str = "There were errors, aborting!";

/// Display the plan, one block per filesystem
pub fn display_plan(plan: &Plan) {
    println!(
        "{} {}",
        style("Plan for").bold().underlined(),
        style(plan.destination()).cyan().bold()
    );
    for filesystem_plan in plan.iter() {
        println!(
            "  {} {} {}",
            style(&filesystem_plan.filesystem).cyan(),
            style("→").dim(),
            style(&filesystem_plan.backup_filesystem).cyan()
        );
        for step in &filesystem_plan.steps {
            println!("    {}", step_line(step));
        }
    }
    println!(
        "  {} transfers, {} filesystems to create",
        style(plan.transfer_count()).green(),
        style(plan.create_targets().len()).green()
    );
}

fn step_line(step: &ReplicationStep) -> String {
    match step {
        ReplicationStep::UpToDate => format!("{}", style(step).dim()),
        ReplicationStep::Error { .. } => format!("{}", style(step).red()),
        ReplicationStep::CreateFilesystem { .. } => format!("{}", style(step).yellow()),
        _ => step.to_string(),
    }
}

/// Each planning failure as `<filesystem> <reason>`, then the abort line
pub fn preflight_lines(failures: &[PlanFailure]) -> Vec<String> {
    failures
        .iter()
        .map(ToString::to_string)
        .chain(std::iter::once(ABORT_MESSAGE.to_string()))
        .collect()
}

/// Display what an executed run did
pub fn display_summary(summary: &RunSummary) {
    let Some(report) = &summary.execution else {
        display_plan(&summary.plan);
        return;
    };

    println!();
    println!("{}", style("Backup Statistics:").bold().underlined());
    for chain in &report.chains {
        let status = match &chain.state {
            ChainState::Done => style("✓".to_string()).green(),
            ChainState::Failed(reason) => style(format!("✗ {}", reason)).red(),
            state => style(format!("{:?}", state)).yellow(),
        };
        println!(
            "  {} {} ({} steps, {})",
            status,
            style(&chain.filesystem).cyan(),
            chain.steps.len(),
            format_duration(chain.execution_time())
        );
    }
    println!("  Filesystems created: {}", style(report.created.len()).green());
    println!(
        "  Transfers completed: {}",
        style(report.transfers_completed()).green()
    );
    println!(
        "  Mountpoints reassigned: {}",
        style(summary.reassigned.len()).green()
    );
    println!(
        "  Duration: {}",
        style(format_duration(report.elapsed)).blue()
    );
}

/// Format duration in human-readable format
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Display an error message with proper formatting
pub fn display_error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), style(message).red());
}

/// Display a success message with proper formatting
pub fn display_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), style(message).green());
}
