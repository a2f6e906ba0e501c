//! snapferry integration test support
//!
//! This crate provides an in-memory ZFS host and a few helpers so the
//! integration tests can drive the whole engine without touching real pools.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// In-memory `zfs`/`zpool` command runner
pub mod fake_zfs;

/// Shared test helpers
pub mod test_utils;

pub use fake_zfs::FakeZfs;
