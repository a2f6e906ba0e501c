//! Core type system and error handling for snapferry
//!
//! This crate provides the foundational types shared by every snapferry
//! crate. It includes:
//!
//! - **Identifiers**: filesystems, snapshots and the backup path mapping
//! - **Observations**: snapshot and mountpoint records parsed from `zfs list`
//! - **Plans**: the [`ReplicationStep`] variants a plan is made of
//! - **Commands**: [`CommandSpec`] pipelines and the [`CommandRunner`] seam
//! - **Error handling**: error types with kinds and severity levels
//!
//! # Features
//!
//! - `std` (default): Enable standard library features
//! - `async`: Enable async trait definitions
//! - `serde`: Enable serialization support
//!
//! # Examples
//!
//! ```rust
//! use snapferry_types::{Filesystem, ReplicationStep, Snapshot};
//!
//! let source = Filesystem::new("tank/home");
//! assert_eq!(source.backup_under("backup/tank").as_str(), "backup/tank/home");
//!
//! let step = ReplicationStep::IncrementalSend {
//!     from: Snapshot::new("daily-1"),
//!     to: Snapshot::new("daily-7"),
//! };
//! assert!(step.is_transfer());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::ConcurrencyLimit;
pub use error::{Error, ErrorKind, ErrorSeverity, PlanFailure};
pub use result::Result;
pub use traits::*;
pub use types::*;
