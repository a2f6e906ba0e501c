//! snapferry - incremental ZFS snapshot replication
//!
//! Reads a backup job description, plans which snapshots each backup
//! filesystem is missing, and replicates them with `zfs send | zfs recv`.

use anyhow::{Context, Result};
use clap::Parser;
use snapferry_config::{Config, ConfigError, ConfigLoader};
use snapferry_engine::{BackupEngine, RunOptions, RunSummary, SystemCommandRunner};
use snapferry_types::{Error, ProgressReporter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

mod display;
mod json_output;
mod progress;

use display::{display_error, display_plan, display_success, display_summary, preflight_lines};
use json_output::{ErrorJson, RunResultJson};
use progress::TransferProgress;

/// Exit status of a failed run or a bad invocation
const FAILURE_STATUS: u8 = 1;

/// snapferry - incremental ZFS snapshot replication
#[derive(Parser, Debug)]
#[command(
    name = "snapferry",
    version = env!("CARGO_PKG_VERSION"),
    about = "Incremental ZFS snapshot replication",
    long_about = "snapferry replicates the snapshots of one or more source pools into a\n\
                  destination filesystem, sending only what each backup is missing."
)]
struct Cli {
    /// Configuration file path
    config: PathBuf,

    /// Print the plan and stop before changing anything
    #[arg(long)]
    dry_run: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Maximum number of filesystems replicated at once
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Show a spinner for each running transfer
    #[arg(long)]
    progress: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            print!("{}", e.render());
            return Ok(ExitCode::from(usage_status(&e)));
        }
    };

    let config = match ConfigLoader::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(ConfigError::Validation { message }) => {
            println!("{}", message);
            return Ok(ExitCode::from(FAILURE_STATUS));
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!("Failed to load configuration from {}", cli.config.display())
            })
        }
    };

    init_logging(&cli, &config)?;
    info!("snapferry v{} starting", env!("CARGO_PKG_VERSION"));

    let destination = config.destination().to_string();
    let options = RunOptions {
        dry_run: cli.dry_run,
        max_concurrent_chains: cli.max_concurrent,
    };

    let mut engine = BackupEngine::new(config, SystemCommandRunner::new());
    if cli.progress && !cli.quiet && !cli.json {
        let progress: Arc<dyn ProgressReporter> = Arc::new(TransferProgress::new());
        engine = engine.with_progress(progress);
    }

    match engine.run(options).await {
        Ok(summary) => report_success(&cli, &summary),
        Err(e) => report_failure(&cli, &e, &destination),
    }
}

/// Exit status for an argument error
///
/// Help and version requests succeed; anything else is a usage error.
fn usage_status(e: &clap::Error) -> u8 {
    if e.use_stderr() {
        FAILURE_STATUS
    } else {
        0
    }
}

fn report_success(cli: &Cli, summary: &RunSummary) -> Result<ExitCode> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&RunResultJson::new(summary))?);
    } else if summary.is_dry_run() {
        display_plan(&summary.plan);
    } else if !cli.quiet {
        display_summary(summary);
        display_success("all complete!");
    }
    Ok(ExitCode::SUCCESS)
}

fn report_failure(cli: &Cli, e: &Error, destination: &str) -> Result<ExitCode> {
    match failure_lines(cli.json, e, destination)? {
        Some(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        None => {
            error!("{}", e);
            display_error(&e.to_string());
        }
    }
    Ok(ExitCode::from(FAILURE_STATUS))
}

/// What a failed run prints on stdout, `None` when it only goes to stderr
fn failure_lines(json: bool, e: &Error, destination: &str) -> Result<Option<Vec<String>>> {
    if json {
        let output = serde_json::to_string_pretty(&ErrorJson::new(e, destination))?;
        return Ok(Some(vec![output]));
    }
    Ok(match e {
        Error::Preflight { failures } => Some(preflight_lines(failures)),
        Error::Validation { message } => Some(vec![message.clone()]),
        _ => None,
    })
}

fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if config.logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::display::ABORT_MESSAGE;
    use snapferry_types::{Filesystem, PlanFailure, PlanFault};

    #[test]
    fn test_config_is_required() {
        let e = Cli::try_parse_from(["snapferry"]).unwrap_err();
        assert_eq!(usage_status(&e), FAILURE_STATUS);
        assert!(e.render().to_string().contains("Usage"));
    }

    #[rstest]
    #[case(&["snapferry", "--help"])]
    #[case(&["snapferry", "--version"])]
    fn test_help_exits_cleanly(#[case] args: &[&str]) {
        let e = Cli::try_parse_from(args).unwrap_err();
        assert_eq!(usage_status(&e), 0);
    }

    #[test]
    fn test_unknown_flag_is_usage_error() {
        let e = Cli::try_parse_from(["snapferry", "--bogus", "job.toml"]).unwrap_err();
        assert_eq!(usage_status(&e), 1);
    }

    fn preflight_error() -> Error {
        Error::Preflight {
            failures: vec![PlanFailure {
                filesystem: Filesystem::new("tank/a"),
                fault: PlanFault::NoBackupSnapshots,
            }],
        }
    }

    #[test]
    fn test_preflight_failure_lines() {
        let lines = failure_lines(false, &preflight_error(), "backup").unwrap().unwrap();
        assert_eq!(lines, vec!["tank/a no backup snapshots :(", ABORT_MESSAGE]);
    }

    #[test]
    fn test_validation_failure_is_printed_verbatim() {
        let error = Error::validation("please specify a destination");
        let lines = failure_lines(false, &error, "").unwrap().unwrap();
        assert_eq!(lines, vec!["please specify a destination"]);
    }

    #[test]
    fn test_execution_failure_goes_to_stderr() {
        let error = Error::execution(&Filesystem::new("tank/a"), "zfs recv failed");
        assert!(failure_lines(false, &error, "backup").unwrap().is_none());
    }

    #[test]
    fn test_json_failure_is_one_document() {
        let lines = failure_lines(true, &preflight_error(), "backup").unwrap().unwrap();
        assert_eq!(lines.len(), 1);
        let json: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(json["kind"], "preflight");
        assert_eq!(json["failures"][0]["kind"], "empty_backup");
    }

    #[test]
    fn test_report_failure_exit_status() {
        let cli = Cli::try_parse_from(["snapferry", "-q", "job.toml"]).unwrap();
        let error = Error::execution(&Filesystem::new("tank/a"), "zfs recv failed");
        let code = report_failure(&cli, &error, "backup").unwrap();
        assert_eq!(format!("{:?}", code), format!("{:?}", ExitCode::from(FAILURE_STATUS)));
    }

    #[rstest]
    #[case(&["snapferry", "job.toml"], false, None)]
    #[case(&["snapferry", "--dry-run", "job.toml"], true, None)]
    #[case(&["snapferry", "job.toml", "--max-concurrent", "4"], false, Some(4))]
    fn test_parse(
        #[case] args: &[&str],
        #[case] dry_run: bool,
        #[case] max_concurrent: Option<usize>,
    ) {
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config, PathBuf::from("job.toml"));
        assert_eq!(cli.dry_run, dry_run);
        assert_eq!(cli.max_concurrent, max_concurrent);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from(["snapferry", "-d", "-q", "--json", "job.toml"]).unwrap();
        assert!(cli.debug);
        assert!(cli.quiet);
        assert!(cli.json);
        assert!(!cli.verbose);
    }
}
