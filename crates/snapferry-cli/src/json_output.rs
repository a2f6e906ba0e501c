//! JSON output structures for the snapferry CLI

use serde::{Deserialize, Serialize};
use snapferry_engine::{ChainReport, ChainState, RunSummary};
use snapferry_sync::Plan;
use snapferry_types::{Error, PlanFailure};

/// Complete JSON output for a run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResultJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// The replication plan
    pub plan: Plan,
    /// Per-filesystem outcomes, empty for a dry run
    pub chains: Vec<ChainJson>,
    /// Backup mountpoints changed after the run
    pub mountpoints_reassigned: usize,
    /// Overall result
    pub result: OperationResult,
}

/// Operation metadata
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// snapferry version
    pub version: String,
    /// `plan` for a dry run, `backup` otherwise
    pub operation: String,
    /// Timestamp when the output was produced
    pub timestamp: String,
    /// Correlation id of the run
    pub run_id: String,
    /// Destination root
    pub destination: String,
}

/// Outcome of one filesystem's chain
#[derive(Debug, Serialize, Deserialize)]
pub struct ChainJson {
    /// Source filesystem
    pub filesystem: String,
    /// `done` or `failed`
    pub status: String,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Task ids of the steps that ran
    pub tasks: Vec<String>,
    /// Transfers that never ran
    pub skipped: usize,
    /// Time spent in commands, in seconds
    pub duration_seconds: f64,
}

impl From<&ChainReport> for ChainJson {
    fn from(chain: &ChainReport) -> Self {
        let (status, error) = match &chain.state {
            ChainState::Failed(reason) => ("failed", Some(reason.clone())),
            ChainState::Done => ("done", None),
            _ => ("incomplete", None),
        };
        Self {
            filesystem: chain.filesystem.to_string(),
            status: status.to_string(),
            error,
            tasks: chain.steps.iter().map(|step| step.task_id.to_string()).collect(),
            skipped: chain.skipped,
            duration_seconds: chain.execution_time().as_secs_f64(),
        }
    }
}

/// Overall operation result
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation was successful
    pub success: bool,
    /// Result message
    pub message: String,
}

impl RunResultJson {
    /// Create the output for a finished or planned run
    pub fn new(summary: &RunSummary) -> Self {
        let chains: Vec<ChainJson> = summary
            .execution
            .as_ref()
            .map(|report| report.chains.iter().map(ChainJson::from).collect())
            .unwrap_or_default();
        // A failed chain surfaces as an error, so a summary is always a success
        let message = if summary.is_dry_run() {
            format!("{} transfers planned", summary.plan.transfer_count())
        } else {
            "all complete!".to_string()
        };

        Self {
            metadata: OperationMetadata::new(
                if summary.is_dry_run() { "plan" } else { "backup" },
                summary.run_id.to_string(),
                summary.plan.destination(),
            ),
            plan: summary.plan.clone(),
            chains,
            mountpoints_reassigned: summary.reassigned.len(),
            result: OperationResult {
                success: true,
                message,
            },
        }
    }
}

/// JSON output for a run that did not get to execute
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    /// Operation metadata
    pub metadata: OperationMetadata,
    /// Error class, e.g. `preflight` or `execution`
    pub kind: String,
    /// Whether the next run picks up where this one stopped
    pub resumable: bool,
    /// Each filesystem that failed planning
    pub failures: Vec<FailureJson>,
    /// Overall result
    pub result: OperationResult,
}

/// One filesystem that failed planning
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureJson {
    /// Source filesystem
    pub filesystem: String,
    /// `divergence` or `empty_backup`
    pub kind: String,
    /// `<filesystem> <reason>` line, as printed without `--json`
    pub message: String,
}

impl From<&PlanFailure> for FailureJson {
    fn from(failure: &PlanFailure) -> Self {
        Self {
            filesystem: failure.filesystem.to_string(),
            kind: failure.to_error().kind().as_str().to_string(),
            message: failure.to_string(),
        }
    }
}

impl ErrorJson {
    /// Create the output for `error`
    pub fn new(error: &Error, destination: &str) -> Self {
        let failures = match error {
            Error::Preflight { failures } => failures.iter().map(FailureJson::from).collect(),
            _ => Vec::new(),
        };
        Self {
            metadata: OperationMetadata::new("backup", String::new(), destination),
            kind: error.kind().as_str().to_string(),
            resumable: error.is_resumable(),
            failures,
            result: OperationResult {
                success: false,
                message: error.to_string(),
            },
        }
    }
}

impl OperationMetadata {
    fn new(operation: &str, run_id: String, destination: &str) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            operation: operation.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id,
            destination: destination.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapferry_sync::PlanBuilder;
    use snapferry_types::{Filesystem, PlanFault, RunId, Snapshot};
    use std::collections::BTreeMap;

    #[test]
    fn test_preflight_error_lists_failures() {
        let error = Error::Preflight {
            failures: vec![
                PlanFailure {
                    filesystem: Filesystem::new("tank/a"),
                    fault: PlanFault::NoBackupSnapshots,
                },
                PlanFailure {
                    filesystem: Filesystem::new("tank/b"),
                    fault: PlanFault::NotOnSource {
                        snapshot: Snapshot::new("b2"),
                    },
                },
            ],
        };
        let json = serde_json::to_value(ErrorJson::new(&error, "backup")).unwrap();
        assert_eq!(json["kind"], "preflight");
        assert_eq!(json["resumable"], false);
        assert_eq!(json["failures"][0]["filesystem"], "tank/a");
        assert_eq!(json["failures"][0]["kind"], "empty_backup");
        assert_eq!(json["failures"][0]["message"], "tank/a no backup snapshots :(");
        assert_eq!(json["failures"][1]["kind"], "divergence");
        assert_eq!(json["result"]["success"], false);
        assert_eq!(json["metadata"]["destination"], "backup");
    }

    #[test]
    fn test_execution_error_is_resumable() {
        let error = Error::execution(&Filesystem::new("tank/a"), "zfs recv failed");
        let json = serde_json::to_value(ErrorJson::new(&error, "backup")).unwrap();
        assert_eq!(json["kind"], "execution");
        assert_eq!(json["resumable"], true);
        assert_eq!(json["failures"].as_array().unwrap().len(), 0);
        assert_eq!(json["result"]["message"], "tank/a: zfs recv failed");
    }

    #[test]
    fn test_planned_run_is_successful() {
        let summary = RunSummary {
            run_id: RunId::nil(),
            plan: PlanBuilder::new("backup").build(&BTreeMap::new(), &BTreeMap::new()),
            unmounted: Vec::new(),
            execution: None,
            reassigned: Vec::new(),
        };
        let json = serde_json::to_value(RunResultJson::new(&summary)).unwrap();
        assert_eq!(json["metadata"]["operation"], "plan");
        assert_eq!(json["result"]["success"], true);
        assert_eq!(json["result"]["message"], "0 transfers planned");
        assert_eq!(json["chains"].as_array().unwrap().len(), 0);
    }
}
