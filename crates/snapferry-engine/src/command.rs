//! External command execution
//!
//! [`SystemCommandRunner`] runs [`CommandSpec`]s as real processes. Pipelines
//! are wired process to process without a shell, so filesystem and snapshot
//! names never need quoting.

use async_trait::async_trait;
use snapferry_types::{CommandOutput, CommandRunner, CommandSpec, Error, Result};
use std::process::Stdio;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

/// Runs commands as child processes of this one
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    /// Create a runner
    pub fn new() -> Self {
        Self
    }

    fn spawn_stages(command: &CommandSpec) -> Result<Vec<Child>> {
        let last = command.stages.len().saturating_sub(1);
        let mut children = Vec::with_capacity(command.stages.len());
        let mut upstream: Option<ChildStdout> = None;

        for (idx, stage) in command.stages.iter().enumerate() {
            let mut process = Command::new(&stage.program);
            process
                .args(&stage.args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match upstream.take() {
                Some(stdout) => {
                    let stdin: Stdio = stdout.try_into()?;
                    process.stdin(stdin);
                }
                None => {
                    process.stdin(Stdio::null());
                }
            }

            let mut child = process.spawn().map_err(|e| Error::Io {
                message: format!("Failed to spawn '{}': {}", stage.program, e),
            })?;
            if idx < last {
                upstream = child.stdout.take();
            }
            children.push(child);
        }

        Ok(children)
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        if command.stages.is_empty() {
            return Err(Error::other("Cannot run an empty command"));
        }
        debug!("Running `{}`", command);

        let children = Self::spawn_stages(command)?;
        let outputs =
            futures::future::join_all(children.into_iter().map(Child::wait_with_output)).await;

        let mut stderr = String::new();
        let mut stdout = String::new();
        let mut failed_status = None;
        for output in outputs {
            let output = output?;
            stderr.push_str(&String::from_utf8_lossy(&output.stderr));
            if failed_status.is_none() && !output.status.success() {
                failed_status = Some(output.status.to_string());
            }
            stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        }

        if let Some(status) = failed_status {
            return Err(Error::Command {
                command: command.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}
