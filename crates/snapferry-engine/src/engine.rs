//! Backup run orchestration

use crate::executor::{ExecutorConfig, PlanExecutor};
use crate::reconcile::{MountpointReconciler, Reassignment};
use crate::task::ExecutionReport;
use crate::zfs::Zfs;
use snapferry_config::Config;
use snapferry_sync::{group, Plan, PlanBuilder, SnapshotCatalog};
use snapferry_types::{
    CommandRunner, ConcurrencyLimit, Error, Filesystem, NoopProgress, ProgressReporter, Result, RunId,
};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-run switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after planning and pre-flight
    pub dry_run: bool,
    /// Override of the configured chain concurrency bound
    pub max_concurrent_chains: Option<usize>,
}

impl RunOptions {
    /// Options for a planning-only run
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Correlation id of the run
    pub run_id: RunId,
    /// The plan that was executed, or would have been
    pub plan: Plan,
    /// Backup filesystems unmounted before executing
    pub unmounted: Vec<Filesystem>,
    /// Execution report, `None` for a dry run
    pub execution: Option<ExecutionReport>,
    /// Mountpoints assigned after executing
    pub reassigned: Vec<Reassignment>,
}

impl RunSummary {
    fn planned(run_id: RunId, plan: Plan) -> Self {
        Self {
            run_id,
            plan,
            unmounted: Vec::new(),
            execution: None,
            reassigned: Vec::new(),
        }
    }

    /// Whether the run stopped after planning
    pub fn is_dry_run(&self) -> bool {
        self.execution.is_none()
    }
}

/// Replicates the configured source pools into the destination
pub struct BackupEngine<R> {
    config: Config,
    zfs: Arc<Zfs<R>>,
    progress: Arc<dyn ProgressReporter>,
}

impl<R: CommandRunner> BackupEngine<R> {
    /// Create an engine running commands through `runner`
    pub fn new(config: Config, runner: R) -> Self {
        let zfs = Arc::new(Zfs::with_config(runner, &config.zfs));
        Self {
            config,
            zfs,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Report step progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// The job configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The ZFS adapter
    pub fn zfs(&self) -> &Zfs<R> {
        &self.zfs
    }

    /// Snapshot catalogs of the selected sources and of the destination
    pub async fn catalogs(&self) -> Result<(SnapshotCatalog, SnapshotCatalog)> {
        let filter = self.config.filter()?;
        let sources = group(
            self.zfs
                .list_snapshots(self.config.sources.as_slice())
                .await?
                .into_iter()
                .filter(|record| filter.matches(record.filesystem.as_str())),
        );
        let backups = group(
            self.zfs
                .list_snapshots_if_exists(self.config.destination())
                .await?,
        );
        debug!(
            "{} source filesystems selected, {} backup filesystems found",
            sources.len(),
            backups.len()
        );
        Ok((sources, backups))
    }

    /// Plan the run without checking it
    pub async fn plan(&self) -> Result<Plan> {
        let (sources, backups) = self.catalogs().await?;
        Ok(PlanBuilder::new(self.config.destination()).build(&sources, &backups))
    }

    /// Plan, check and, unless `options.dry_run`, execute the backup
    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        self.config.validate()?;
        let run_id = RunId::new_v4();
        let destination = self.config.destination();

        let (sources, backups) = self.catalogs().await?;
        let plan = PlanBuilder::new(destination).build(&sources, &backups);
        for filesystem_plan in plan.iter() {
            for step in &filesystem_plan.steps {
                info!("{}: {}", filesystem_plan.filesystem, step);
            }
        }
        plan.preflight()?;

        let executor_config = match options.max_concurrent_chains {
            Some(limit) => ExecutorConfig {
                max_concurrent_chains: ConcurrencyLimit::bounded(limit)
                    .map_err(Error::validation)?,
            },
            None => ExecutorConfig::from_config(&self.config)?,
        };

        if options.dry_run {
            info!("Dry run, nothing executed");
            return Ok(RunSummary::planned(run_id, plan));
        }

        let source_filesystems: Vec<Filesystem> = sources.keys().cloned().collect();
        let backup_filesystems: Vec<Filesystem> = backups.keys().cloned().collect();

        let unmounted = self
            .unmount_backups(&source_filesystems, &backups, destination)
            .await?;

        let executor = PlanExecutor::new(Arc::clone(&self.zfs), executor_config)
            .with_run_id(run_id)
            .with_progress(Arc::clone(&self.progress));
        let execution = executor.execute(&plan).await?;

        let reassigned = MountpointReconciler::new(self.zfs.as_ref())
            .reconcile(&source_filesystems, &backup_filesystems, destination)
            .await?;

        info!("all complete!");
        Ok(RunSummary {
            run_id,
            plan,
            unmounted,
            execution: Some(execution),
            reassigned,
        })
    }

    /// Unmount the existing backups of mounted sources, deepest mount first
    ///
    /// A backup that is already unmounted is skipped; any other unmount
    /// failure aborts the run before the first transfer.
    async fn unmount_backups(
        &self,
        sources: &[Filesystem],
        backups: &SnapshotCatalog,
        destination: &str,
    ) -> Result<Vec<Filesystem>> {
        let mut mounted: Vec<(Filesystem, String)> = self
            .zfs
            .get_mountpoints(sources)
            .await?
            .into_iter()
            .filter_map(|record| record.mountpoint.map(|mp| (record.filesystem, mp)))
            .collect();
        mounted.sort_by_key(|(_, mountpoint)| Reverse(mountpoint.len()));

        let mut unmounted = Vec::new();
        for (source, _) in mounted {
            let backup = source.backup_under(destination);
            if !backups.contains_key(&backup) {
                continue;
            }
            let was_mounted = self
                .zfs
                .unmount_if_mounted(&backup)
                .await
                .map_err(|e| Error::execution(&backup, format!("cannot unmount backup: {}", e)))?;
            if was_mounted {
                debug!("Unmounted {}", backup);
                unmounted.push(backup);
            }
        }
        Ok(unmounted)
    }
}
