//! Task identifiers, chain state and execution reports

use snapferry_types::{Filesystem, ReplicationStep, RunId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Identifier of one executed replication step, `TASK001`, `TASK002`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Numeric value of the identifier
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TASK{:03}", self.0)
    }
}

/// Monotonic task id source owned by a single executor
#[derive(Debug)]
pub struct TaskIdGenerator {
    next: AtomicU64,
}

impl TaskIdGenerator {
    /// Start counting at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start counting at `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Hand out the next identifier
    pub fn next_id(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one filesystem's transfer chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    /// Waiting for a worker slot
    Pending,
    /// Running the step at this index of the chain
    Running(usize),
    /// Every step completed
    Done,
    /// A step failed; later steps were not attempted
    Failed(String),
}

impl ChainState {
    /// Check if the chain is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Check if the chain failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One executed step of a chain
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Task id assigned when the step started
    pub task_id: TaskId,
    /// The step
    pub step: ReplicationStep,
    /// Whether it succeeded
    pub succeeded: bool,
    /// Wall time spent in the external command
    pub duration: Duration,
}

/// Outcome of one filesystem's transfer chain
#[derive(Debug, Clone)]
pub struct ChainReport {
    /// Source filesystem
    pub filesystem: Filesystem,
    /// Final chain state
    pub state: ChainState,
    /// Steps that were started, in order
    pub steps: Vec<StepRecord>,
    /// Transfers in the chain that never ran
    pub skipped: usize,
}

impl ChainReport {
    pub(crate) fn new(filesystem: Filesystem) -> Self {
        Self {
            filesystem,
            state: ChainState::Pending,
            steps: Vec::new(),
            skipped: 0,
        }
    }

    /// Whether every step of the chain completed
    pub fn is_success(&self) -> bool {
        self.state == ChainState::Done
    }

    /// Total time spent in this chain's commands
    pub fn execution_time(&self) -> Duration {
        self.steps.iter().map(|step| step.duration).sum()
    }
}

/// Result of executing a plan
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Correlation id of the run
    pub run_id: RunId,
    /// Backup filesystems created in the existence phase
    pub created: Vec<Filesystem>,
    /// One report per filesystem in the plan, in plan order
    pub chains: Vec<ChainReport>,
    /// Filesystem whose chain was observed failing first
    pub first_failure: Option<Filesystem>,
    /// Total wall time
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub(crate) fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            created: Vec::new(),
            chains: Vec::new(),
            first_failure: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Whether every chain completed
    pub fn is_success(&self) -> bool {
        self.chains.iter().all(ChainReport::is_success)
    }

    /// Chains that failed
    pub fn failed(&self) -> impl Iterator<Item = &ChainReport> {
        self.chains.iter().filter(|chain| chain.state.is_failed())
    }

    /// Chain report of the first observed failure
    pub fn first_failed(&self) -> Option<&ChainReport> {
        let filesystem = self.first_failure.as_ref()?;
        self.chains.iter().find(|chain| &chain.filesystem == filesystem)
    }

    /// Number of transfers that completed
    pub fn transfers_completed(&self) -> usize {
        self.chains
            .iter()
            .flat_map(|chain| &chain.steps)
            .filter(|step| step.succeeded)
            .count()
    }
}

/// Timer for a single step
pub(crate) struct StepTimer(Instant);

impl StepTimer {
    pub(crate) fn start() -> Self {
        Self(Instant::now())
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_format() {
        let ids = TaskIdGenerator::new();
        assert_eq!(ids.next_id().to_string(), "TASK001");
        assert_eq!(ids.next_id().to_string(), "TASK002");
        assert_eq!(TaskIdGenerator::starting_at(1234).next_id().to_string(), "TASK1234");
    }

    #[test]
    fn test_generators_are_independent() {
        let first = TaskIdGenerator::new();
        let second = TaskIdGenerator::new();
        first.next_id();
        first.next_id();
        assert_eq!(second.next_id().get(), 1);
    }

    #[test]
    fn test_chain_state() {
        assert!(!ChainState::Pending.is_terminal());
        assert!(!ChainState::Running(0).is_terminal());
        assert!(ChainState::Done.is_terminal());
        assert!(ChainState::Failed("boom".to_string()).is_failed());
    }

    #[test]
    fn test_report_success() {
        let mut report = ExecutionReport::new(RunId::nil());
        let mut chain = ChainReport::new(Filesystem::new("tank/a"));
        chain.state = ChainState::Done;
        report.chains.push(chain);
        assert!(report.is_success());

        let mut failed = ChainReport::new(Filesystem::new("tank/b"));
        failed.state = ChainState::Failed("recv failed".to_string());
        report.chains.push(failed);
        assert!(!report.is_success());
        assert_eq!(report.failed().count(), 1);
    }
}
