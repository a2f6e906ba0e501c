//! Replication engine for snapferry
//!
//! This crate turns a backup job into side effects on the storage system. It
//! lists snapshots, plans with `snapferry-sync`, and executes the plan through
//! the `zfs` and `zpool` tools.
//!
//! # Features
//!
//! - **Two-phase execution**: backup filesystems are created before any transfer starts
//! - **Independent chains**: each filesystem's transfers run in order, filesystems run concurrently
//! - **Optional bound**: a semaphore limits concurrent chains when configured
//! - **Mountpoint reconciliation**: backups take over their sources' mountpoints
//! - **Testable**: every command goes through a [`CommandRunner`](snapferry_types::CommandRunner)
//!
//! # Examples
//!
//! ```rust,no_run
//! use snapferry_config::ConfigLoader;
//! use snapferry_engine::{BackupEngine, RunOptions, SystemCommandRunner};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load_from_file("snapferry.toml")?;
//! let engine = BackupEngine::new(config, SystemCommandRunner::new());
//! let summary = engine.run(RunOptions::default()).await?;
//! println!("Planned {} transfers", summary.plan.transfer_count());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod engine;
pub mod executor;
pub mod monitor;
pub mod reconcile;
pub mod task;
pub mod zfs;

pub use command::SystemCommandRunner;
pub use engine::{BackupEngine, RunOptions, RunSummary};
pub use executor::{ExecutorConfig, PlanExecutor};
pub use monitor::{ActiveStep, Statistics, StatisticsCollector};
pub use reconcile::{strip_altroot, MountpointReconciler, Reassignment};
pub use task::{ChainReport, ChainState, ExecutionReport, StepRecord, TaskId, TaskIdGenerator};
pub use zfs::Zfs;
