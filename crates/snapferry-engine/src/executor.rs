//! Plan executor
//!
//! Execution happens in two phases. First every backup filesystem the plan
//! needs is created, one after another. Then each filesystem's transfers run
//! as a chain: strictly in order within the chain, concurrently across
//! chains. A failing step stops its own chain only; sibling chains always run
//! to completion.

use crate::task::{
    ChainReport, ChainState, ExecutionReport, StepRecord, StepTimer, TaskIdGenerator,
};
use crate::zfs::Zfs;
use futures::stream::{FuturesUnordered, StreamExt};
use snapferry_config::Config;
use snapferry_sync::{FilesystemPlan, Plan};
use snapferry_types::{
    CommandRunner, ConcurrencyLimit, Error, Filesystem, NoopProgress, ProgressReporter, Result, RunId,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Configuration for the plan executor
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    /// Bound on chains running at once
    pub max_concurrent_chains: ConcurrencyLimit,
}

impl ExecutorConfig {
    /// Create executor config from main config
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_concurrent_chains: config.concurrency_limit()?,
        })
    }
}

/// Executes replication plans against a ZFS adapter
pub struct PlanExecutor<R> {
    zfs: Arc<Zfs<R>>,
    config: ExecutorConfig,
    task_ids: TaskIdGenerator,
    run_id: RunId,
    progress: Arc<dyn ProgressReporter>,
}

impl<R: CommandRunner> PlanExecutor<R> {
    /// Create a new executor
    pub fn new(zfs: Arc<Zfs<R>>, config: ExecutorConfig) -> Self {
        Self {
            zfs,
            config,
            task_ids: TaskIdGenerator::new(),
            run_id: RunId::new_v4(),
            progress: Arc::new(NoopProgress),
        }
    }

    /// Report step progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Use `run_id` as the correlation id of reports
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// Correlation id of this executor's reports
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Execute `plan`, failing if any chain failed
    ///
    /// Every chain still runs to completion; the error names the first
    /// failure that was observed.
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionReport> {
        let report = self.execute_all(plan).await?;
        match report.first_failed() {
            Some(chain) => {
                let reason = match &chain.state {
                    ChainState::Failed(reason) => reason.clone(),
                    state => format!("{:?}", state),
                };
                Err(Error::execution(&chain.filesystem, reason))
            }
            None => Ok(report),
        }
    }

    /// Execute `plan` and report on every chain
    ///
    /// Only a failure while creating backup filesystems is returned as an
    /// error; chain failures are recorded in the report.
    pub async fn execute_all(&self, plan: &Plan) -> Result<ExecutionReport> {
        let started = Instant::now();
        let mut report = ExecutionReport::new(self.run_id);

        report.created = self.ensure_filesystems(plan).await?;

        let semaphore = self
            .config
            .max_concurrent_chains
            .get()
            .map(|limit| Arc::new(Semaphore::new(limit)));
        debug!(
            "Running {} chains with limit {:?}",
            plan.len(),
            self.config.max_concurrent_chains.get()
        );

        let mut chains: FuturesUnordered<_> = plan
            .iter()
            .enumerate()
            .map(|(idx, filesystem_plan)| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = match &semaphore {
                        Some(semaphore) => semaphore.acquire().await.ok(),
                        None => None,
                    };
                    (idx, self.run_chain(filesystem_plan).await)
                }
            })
            .collect();

        let mut finished = Vec::with_capacity(plan.len());
        while let Some((idx, chain)) = chains.next().await {
            if let ChainState::Failed(reason) = &chain.state {
                warn!("{}: chain stopped: {}", chain.filesystem, reason);
                if report.first_failure.is_none() {
                    report.first_failure = Some(chain.filesystem.clone());
                }
            }
            finished.push((idx, chain));
        }
        finished.sort_by_key(|(idx, _)| *idx);
        report.chains = finished.into_iter().map(|(_, chain)| chain).collect();
        report.elapsed = started.elapsed();

        info!(
            "Executed {} transfers across {} filesystems in {:?}",
            report.transfers_completed(),
            report.chains.len(),
            report.elapsed
        );
        Ok(report)
    }

    async fn ensure_filesystems(&self, plan: &Plan) -> Result<Vec<Filesystem>> {
        let mut created = Vec::new();
        for target in plan.create_targets() {
            let task_id = self.task_ids.next_id();
            info!("{} {}: create backup filesystem [{}]", task_id, target, target);
            self.zfs
                .create_filesystem(target)
                .await
                .map_err(|e| Error::execution(target, e.to_string()))?;
            info!("{} done", task_id);
            created.push(target.clone());
        }
        Ok(created)
    }

    async fn run_chain(&self, plan: &FilesystemPlan) -> ChainReport {
        let mut report = ChainReport::new(plan.filesystem.clone());
        let transfers: Vec<_> = plan.transfers().collect();

        for (position, step) in transfers.iter().enumerate() {
            let Some(command) = self
                .zfs
                .send_command(&plan.filesystem, &plan.backup_filesystem, step)
            else {
                continue;
            };
            report.state = ChainState::Running(position);

            let task_id = self.task_ids.next_id();
            let task = task_id.to_string();
            let description = step.describe();
            info!("{} {}: {}", task, plan.filesystem, description);
            self.progress
                .step_started(&task, plan.filesystem.as_str(), &description);

            let timer = StepTimer::start();
            let result = self.zfs.runner().run(&command).await;
            report.steps.push(StepRecord {
                task_id,
                step: (*step).clone(),
                succeeded: result.is_ok(),
                duration: timer.elapsed(),
            });

            if let Err(error) = result {
                warn!("{} failed: {}", task, error);
                self.progress.step_failed(&task, &error);
                report.skipped = transfers.len() - position - 1;
                report.state = ChainState::Failed(error.to_string());
                return report;
            }
            info!("{} done", task);
            self.progress.step_finished(&task);
        }

        report.state = ChainState::Done;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use snapferry_sync::PlanBuilder;
    use snapferry_types::{CommandOutput, CommandSpec, Snapshot};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_when: Option<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
            let line = command.to_string();
            self.seen.lock().unwrap().push(line.clone());
            tokio::task::yield_now().await;
            match self.fail_when {
                Some(needle) if line.contains(needle) => Err(Error::Command {
                    command: line,
                    status: "exit status: 1".to_string(),
                    stderr: "cannot receive".to_string(),
                }),
                _ => Ok(CommandOutput::default()),
            }
        }
    }

    fn catalog(entries: &[(&str, &[&str])]) -> BTreeMap<Filesystem, Vec<Snapshot>> {
        entries
            .iter()
            .map(|(fs, snaps)| {
                (
                    Filesystem::new(*fs),
                    snaps.iter().map(|s| Snapshot::new(*s)).collect(),
                )
            })
            .collect()
    }

    fn executor(runner: Recorder) -> PlanExecutor<Recorder> {
        PlanExecutor::new(Arc::new(Zfs::new(runner)), ExecutorConfig::default())
    }

    #[tokio::test]
    async fn test_creates_before_sends() {
        let plan = PlanBuilder::new("backup").build(
            &catalog(&[("tank/a", &["a1", "a2"]), ("tank/b", &["b1"])]),
            &BTreeMap::new(),
        );
        let executor = executor(Recorder::default());
        let report = executor.execute(&plan).await.unwrap();

        let seen = executor.zfs.runner().seen.lock().unwrap().clone();
        assert_eq!(seen[0], "zfs create -p backup/a");
        assert_eq!(seen[1], "zfs create -p backup/b");
        assert!(seen[2..].iter().all(|line| line.starts_with("zfs send")));
        assert_eq!(seen.len(), 5);
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.transfers_completed(), 3);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_failure_halts_only_its_chain() {
        let plan = PlanBuilder::new("backup").build(
            &catalog(&[("tank/a", &["a1", "a2"]), ("tank/b", &["b1", "b2"])]),
            &BTreeMap::new(),
        );
        let executor = executor(Recorder {
            fail_when: Some("tank/a@a1 |"),
            ..Default::default()
        });

        let report = executor.execute_all(&plan).await.unwrap();
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].filesystem.as_str(), "tank/a");
        assert_eq!(failed[0].skipped, 1);
        assert!(report.chains[1].is_success());
        assert_eq!(report.chains[1].steps.len(), 2);

        let seen = executor.zfs.runner().seen.lock().unwrap().clone();
        assert!(!seen.iter().any(|line| line.contains("tank/a@a2")));
    }

    #[tokio::test]
    async fn test_execute_reports_first_failure() {
        let plan = PlanBuilder::new("backup")
            .build(&catalog(&[("tank/a", &["a1"])]), &BTreeMap::new());
        let executor = executor(Recorder {
            fail_when: Some("recv"),
            ..Default::default()
        });
        let err = executor.execute(&plan).await.unwrap_err();
        assert!(matches!(err, Error::Execution { ref filesystem, .. } if filesystem.as_str() == "tank/a"));
    }

    #[tokio::test]
    async fn test_create_failure_aborts_before_sends() {
        let plan = PlanBuilder::new("backup")
            .build(&catalog(&[("tank/a", &["a1"])]), &BTreeMap::new());
        let executor = executor(Recorder {
            fail_when: Some("create"),
            ..Default::default()
        });
        assert!(executor.execute_all(&plan).await.is_err());
        assert_eq!(executor.zfs.runner().seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_executor_config_from_config() {
        let config = Config {
            max_concurrent_chains: Some(3),
            ..Config::default()
        };
        let executor_config = ExecutorConfig::from_config(&config).unwrap();
        assert_eq!(executor_config.max_concurrent_chains.get(), Some(3));

        let unbounded = ExecutorConfig::from_config(&Config::default()).unwrap();
        assert!(unbounded.max_concurrent_chains.is_unbounded());

        let zero = Config {
            max_concurrent_chains: Some(0),
            ..Config::default()
        };
        assert!(matches!(
            ExecutorConfig::from_config(&zero),
            Err(Error::Config { ref message }) if message.contains("max_concurrent_chains")
        ));
    }

    #[tokio::test]
    async fn test_up_to_date_plan_runs_nothing() {
        let both = catalog(&[("tank/a", &["a1"])]);
        let backups = catalog(&[("backup/a", &["a1"])]);
        let plan = PlanBuilder::new("backup").build(&both, &backups);
        let executor = executor(Recorder::default());
        let report = executor.execute(&plan).await.unwrap();
        assert!(report.is_success());
        assert!(executor.zfs.runner().seen.lock().unwrap().is_empty());
    }
}
