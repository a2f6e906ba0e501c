//! Core traits for snapferry operations
//!
//! The storage system is only ever touched through [`CommandRunner`], so the
//! executor and reconciler can be driven by an in-memory fake in tests.

#[cfg(feature = "async")]
use crate::{CommandOutput, CommandSpec, Result};
#[cfg(feature = "async")]
use async_trait::async_trait;

/// Capability to run external commands
///
/// Implementations return `Ok` only when every stage of the command exited
/// successfully; a non-zero exit maps to [`crate::Error::Command`].
#[cfg(feature = "async")]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command or pipeline to completion
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;
}

#[cfg(feature = "async")]
#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        (**self).run(command).await
    }
}

/// Trait for reporting replication progress
pub trait ProgressReporter: Send + Sync {
    /// A step started
    fn step_started(&self, task: &str, filesystem: &str, description: &str);

    /// A step finished successfully
    fn step_finished(&self, task: &str);

    /// A step failed
    fn step_failed(&self, task: &str, error: &crate::Error);
}

/// Progress reporter that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn step_started(&self, _task: &str, _filesystem: &str, _description: &str) {}

    fn step_finished(&self, _task: &str) {}

    fn step_failed(&self, _task: &str, _error: &crate::Error) {}
}
