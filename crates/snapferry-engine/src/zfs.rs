//! ZFS command adapter
//!
//! [`Zfs`] is the only place that knows the `zfs`/`zpool` command lines and
//! their tab-separated output. Everything it runs goes through a
//! [`CommandRunner`], so the whole engine can be driven by a fake in tests.

use snapferry_config::ZfsConfig;
use snapferry_sync::parse_snapshot_listing;
use snapferry_types::{
    CommandOutput, CommandRunner, CommandSpec, Error, Filesystem, MountpointRecord,
    ReplicationStep, Result, SnapshotRecord,
};
use tracing::debug;

/// Marker in `zfs` stderr for a dataset that is not there
const MISSING_DATASET: &str = "dataset does not exist";

/// Marker in `zfs unmount` stderr for a filesystem that is already unmounted
const NOT_MOUNTED: &str = "not currently mounted";

/// Typed front end to the `zfs` and `zpool` tools
#[derive(Debug, Clone)]
pub struct Zfs<R> {
    runner: R,
    zfs_binary: String,
    zpool_binary: String,
}

impl<R: CommandRunner> Zfs<R> {
    /// Create an adapter using the default `zfs` and `zpool` binaries
    pub fn new(runner: R) -> Self {
        Self::with_config(runner, &ZfsConfig::default())
    }

    /// Create an adapter using the configured binaries
    pub fn with_config(runner: R, config: &ZfsConfig) -> Self {
        Self {
            runner,
            zfs_binary: config.zfs_binary.clone(),
            zpool_binary: config.zpool_binary.clone(),
        }
    }

    /// Underlying command runner
    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn zfs(&self) -> CommandSpec {
        CommandSpec::new(self.zfs_binary.as_str())
    }

    async fn run(&self, command: CommandSpec) -> Result<CommandOutput> {
        debug!("zfs: {}", command);
        self.runner.run(&command).await
    }

    /// List every snapshot under `roots`, recursively, in creation order
    pub async fn list_snapshots<S: AsRef<str>>(&self, roots: &[S]) -> Result<Vec<SnapshotRecord>> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }
        let command = self
            .zfs()
            .args(["list", "-H", "-r", "-t", "snapshot", "-o", "name"])
            .args(roots.iter().map(AsRef::as_ref));
        let output = self.run(command).await?;
        Ok(parse_snapshot_listing(&output.stdout))
    }

    /// Like [`Zfs::list_snapshots`] for a single root that may not exist yet
    pub async fn list_snapshots_if_exists(&self, root: &str) -> Result<Vec<SnapshotRecord>> {
        match self.list_snapshots(std::slice::from_ref(&root)).await {
            Err(Error::Command { ref stderr, .. }) if stderr.contains(MISSING_DATASET) => {
                debug!("{} does not exist yet, treating it as empty", root);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Current mountpoint of each filesystem
    pub async fn get_mountpoints(&self, filesystems: &[Filesystem]) -> Result<Vec<MountpointRecord>> {
        if filesystems.is_empty() {
            return Ok(Vec::new());
        }
        let command = self
            .zfs()
            .args(["list", "-H", "-o", "name,mountpoint"])
            .args(filesystems.iter().map(Filesystem::as_str));
        let output = self.run(command).await?;
        output.lines().map(parse_mountpoint_line).collect()
    }

    /// Alternate root of `pool`, empty when none is set
    pub async fn get_altroot(&self, pool: &str) -> Result<String> {
        let command = CommandSpec::new(self.zpool_binary.as_str())
            .args(["get", "altroot", "-H", "-o", "value", pool]);
        let output = self.run(command).await?;
        let value = output.stdout.trim();
        Ok(if value == "-" { String::new() } else { value.to_string() })
    }

    /// Create `target` and any missing parents
    pub async fn create_filesystem(&self, target: &Filesystem) -> Result<()> {
        self.run(self.zfs().args(["create", "-p", target.as_str()]))
            .await
            .map(drop)
    }

    /// Forcibly unmount `filesystem`
    pub async fn unmount(&self, filesystem: &Filesystem) -> Result<()> {
        self.run(self.zfs().args(["unmount", "-f", filesystem.as_str()]))
            .await
            .map(drop)
    }

    /// Forcibly unmount `filesystem`, `false` when it was not mounted
    pub async fn unmount_if_mounted(&self, filesystem: &Filesystem) -> Result<bool> {
        match self.unmount(filesystem).await {
            Ok(()) => Ok(true),
            Err(Error::Command { ref stderr, .. }) if stderr.contains(NOT_MOUNTED) => {
                debug!("{} is not mounted", filesystem);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Point `filesystem` at `mountpoint`
    pub async fn set_mountpoint(&self, filesystem: &Filesystem, mountpoint: &str) -> Result<()> {
        self.run(
            self.zfs()
                .arg("set")
                .arg(format!("mountpoint={}", mountpoint))
                .arg(filesystem.as_str()),
        )
        .await
        .map(drop)
    }

    /// Send/receive pipeline for a transfer step, `None` for other steps
    pub fn send_command(
        &self,
        source: &Filesystem,
        backup: &Filesystem,
        step: &ReplicationStep,
    ) -> Option<CommandSpec> {
        let send = match step {
            ReplicationStep::InitialSend { snapshot } => {
                self.zfs().args(["send".to_string(), snapshot.qualified(source)])
            }
            ReplicationStep::IncrementalSend { from, to } => self.zfs().args([
                "send".to_string(),
                "-i".to_string(),
                from.qualified(source),
                to.qualified(source),
            ]),
            _ => return None,
        };
        Some(send.pipe(self.zfs().args(["recv", "-F", backup.as_str()])))
    }
}

fn parse_mountpoint_line(line: &str) -> Result<MountpointRecord> {
    let mut fields = line.splitn(2, '\t');
    let name = fields
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::parse(format!("Malformed mountpoint line: {:?}", line)))?;
    Ok(MountpointRecord::new(name, fields.next()))
}
