//! Snapshot-based incremental replication planning for snapferry
//!
//! This crate turns snapshot listings into a replication plan:
//!
//! - **Snapshot catalog**: groups `(filesystem, snapshot)` observations into
//!   ordered per-filesystem histories
//! - **Plan building**: diffs each source history against its backup history
//!   and emits the minimal, resumable list of steps
//! - **Pre-flight**: refuses the whole plan when any filesystem has diverged
//!
//! # Examples
//!
//! ```rust
//! use snapferry_sync::{catalog, PlanBuilder};
//! use snapferry_types::{ReplicationStep, Snapshot, SnapshotRecord};
//!
//! let sources = catalog::group(vec![
//!     SnapshotRecord::new("tank/home", "daily-1"),
//!     SnapshotRecord::new("tank/home", "daily-2"),
//! ]);
//! let backups = catalog::group(vec![SnapshotRecord::new("backup/home", "daily-1")]);
//!
//! let plan = PlanBuilder::new("backup").build(&sources, &backups);
//! plan.preflight().expect("no diverged filesystems");
//! assert_eq!(
//!     plan.steps("tank/home").unwrap(),
//!     &[ReplicationStep::IncrementalSend {
//!         from: Snapshot::new("daily-1"),
//!         to: Snapshot::new("daily-2"),
//!     }]
//! );
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod plan;

pub use catalog::{group, parse_snapshot_listing, SnapshotCatalog};
pub use plan::{build_filesystem_plan, make_plans, FilesystemPlan, Plan, PlanBuilder};
