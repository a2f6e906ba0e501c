//! Core data types for snapferry
//!
//! This module provides the vocabulary shared by the planner, the executor and
//! the reconciler: filesystem and snapshot identifiers, raw observations coming
//! back from the storage system, replication steps and external command specs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single backup run, used to correlate log lines
pub type RunId = uuid::Uuid;

/// Ordered snapshot history of one filesystem, oldest first
pub type SnapshotHistory = Vec<Snapshot>;

/// Mountpoint values that mean "not mounted anywhere"
pub const IGNORED_MOUNTPOINTS: &[&str] = &["-", "none", "legacy"];

/// Hierarchical, path-addressed filesystem identifier such as `tank/home/alice`
///
/// The first path segment is the pool name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Filesystem(String);

impl Filesystem {
    /// Create a filesystem identifier
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Full name as given by the storage system
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the pool this filesystem lives in
    pub fn pool(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// Path segments, pool first
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Compute the backup counterpart of this filesystem under `destination`
    ///
    /// The pool segment is dropped and the remainder appended to the
    /// destination root, so `tank/a/b` under `backup/tank` becomes
    /// `backup/tank/a/b`, and the pool root itself maps to `destination`.
    pub fn backup_under(&self, destination: &str) -> Self {
        let mut backup = destination.trim_end_matches('/').to_string();
        for segment in self.segments().skip(1) {
            backup.push('/');
            backup.push_str(segment);
        }
        Self(backup)
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Filesystem {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Filesystem {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Filesystem {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque snapshot name (the part after `@`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Snapshot(String);

impl Snapshot {
    /// Create a snapshot identifier
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Snapshot name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fully qualified `filesystem@snapshot` name
    pub fn qualified(&self, filesystem: &Filesystem) -> String {
        format!("{}@{}", filesystem, self.0)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Snapshot {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Snapshot {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// One `(filesystem, snapshot)` observation from a snapshot listing
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SnapshotRecord {
    /// Filesystem the snapshot belongs to
    pub filesystem: Filesystem,
    /// Snapshot name
    pub snapshot: Snapshot,
}

impl SnapshotRecord {
    /// Create a snapshot observation
    pub fn new(filesystem: impl Into<Filesystem>, snapshot: impl Into<Snapshot>) -> Self {
        Self {
            filesystem: filesystem.into(),
            snapshot: snapshot.into(),
        }
    }

    /// Parse a `filesystem@snapshot` name, `None` when there is no `@`
    pub fn parse(name: &str) -> Option<Self> {
        let (filesystem, snapshot) = name.trim().split_once('@')?;
        if filesystem.is_empty() || snapshot.is_empty() {
            return None;
        }
        Some(Self::new(filesystem, snapshot))
    }
}

/// Observed mountpoint of a filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MountpointRecord {
    /// Filesystem name
    pub filesystem: Filesystem,
    /// Mountpoint, `None` when unmounted, legacy or explicitly `none`
    pub mountpoint: Option<String>,
}

impl MountpointRecord {
    /// Create a record, normalizing the reserved no-mountpoint markers to `None`
    pub fn new(filesystem: impl Into<Filesystem>, mountpoint: Option<&str>) -> Self {
        let mountpoint = mountpoint
            .map(str::trim)
            .filter(|value| !value.is_empty() && !IGNORED_MOUNTPOINTS.contains(value))
            .map(str::to_string);
        Self {
            filesystem: filesystem.into(),
            mountpoint,
        }
    }

    /// Whether the filesystem has a usable mountpoint
    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some()
    }
}

/// Why a filesystem cannot be planned safely
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PlanFault {
    /// The backup filesystem exists but holds no snapshots
    NoBackupSnapshots,
    /// The newest backup snapshot is missing from the source history
    NotOnSource {
        /// Newest snapshot on the backup side
        snapshot: Snapshot,
    },
}

impl fmt::Display for PlanFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBackupSnapshots => f.write_str("no backup snapshots :("),
            Self::NotOnSource { snapshot } => {
                write!(f, "last backup snapshot [{}] is not on source :(", snapshot)
            }
        }
    }
}

/// One step of a filesystem's replication plan
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(tag = "step", rename_all = "snake_case"))]
pub enum ReplicationStep {
    /// Create the destination filesystem, including parents
    CreateFilesystem {
        /// Backup filesystem to create
        target: Filesystem,
    },
    /// Send the first snapshot with no base
    InitialSend {
        /// Snapshot to send
        snapshot: Snapshot,
    },
    /// Send the delta between two snapshots of the same filesystem
    IncrementalSend {
        /// Base snapshot already present on the backup
        from: Snapshot,
        /// Newest snapshot to bring over
        to: Snapshot,
    },
    /// The backup already matches the source
    UpToDate,
    /// The filesystem cannot be planned safely
    Error {
        /// What went wrong
        reason: PlanFault,
    },
}

impl ReplicationStep {
    /// Whether this step carries a send/receive transfer
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::InitialSend { .. } | Self::IncrementalSend { .. })
    }

    /// Whether this step is a planning error
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Human readable description used in logs and plan listings
    pub fn describe(&self) -> String {
        match self {
            Self::CreateFilesystem { target } => format!("create backup filesystem [{}]", target),
            Self::InitialSend { snapshot } => format!("send initial snapshot {}", snapshot),
            Self::IncrementalSend { from, to } => {
                format!("send incrementals from {} to {}", from, to)
            }
            Self::UpToDate => "all up to date!".to_string(),
            Self::Error { reason } => reason.to_string(),
        }
    }
}

impl fmt::Display for ReplicationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A single program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Invocation {
    /// Program to run
    pub program: String,
    /// Arguments, passed verbatim without a shell
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// External command, possibly a pipeline of several invocations
///
/// Each stage's stdout feeds the next stage's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandSpec {
    /// Pipeline stages, left to right; never empty
    pub stages: Vec<Invocation>,
}

impl CommandSpec {
    /// Create a command running `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            stages: vec![Invocation {
                program: program.into(),
                args: Vec::new(),
            }],
        }
    }

    /// Append an argument to the last stage
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(stage) = self.stages.last_mut() {
            stage.args.push(arg.into());
        }
        self
    }

    /// Append arguments to the last stage
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(stage) = self.stages.last_mut() {
            stage.args.extend(args.into_iter().map(Into::into));
        }
        self
    }

    /// Pipe this command's output into `next`
    pub fn pipe(mut self, next: CommandSpec) -> Self {
        self.stages.extend(next.stages);
        self
    }

    /// Whether the command has more than one stage
    pub fn is_pipeline(&self) -> bool {
        self.stages.len() > 1
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, stage) in self.stages.iter().enumerate() {
            if idx > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Captured output of a successful external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommandOutput {
    /// Standard output of the last stage
    pub stdout: String,
    /// Standard error of all stages, concatenated
    pub stderr: String,
}

impl CommandOutput {
    /// Output with the given stdout and nothing on stderr
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Non-empty, trimmed stdout lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim_end).filter(|line| !line.is_empty())
    }
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./@=:,+%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("tank/a", "my/backup", "my/backup/a")]
    #[case("tank/a/b/c", "my/backup", "my/backup/a/b/c")]
    #[case("tank", "my/backup", "my/backup")]
    #[case("tank/a", "my/backup/", "my/backup/a")]
    fn test_backup_mapping(#[case] source: &str, #[case] destination: &str, #[case] expected: &str) {
        assert_eq!(Filesystem::new(source).backup_under(destination).as_str(), expected);
    }

    #[test]
    fn test_filesystem_pool() {
        assert_eq!(Filesystem::new("tank/home/alice").pool(), "tank");
        assert_eq!(Filesystem::new("tank").pool(), "tank");
    }

    #[test]
    fn test_snapshot_record_parse() {
        let record = SnapshotRecord::parse("tank/a@daily-1").unwrap();
        assert_eq!(record.filesystem.as_str(), "tank/a");
        assert_eq!(record.snapshot.as_str(), "daily-1");
        assert!(SnapshotRecord::parse("tank/a").is_none());
        assert!(SnapshotRecord::parse("@x").is_none());
    }

    #[rstest]
    #[case(Some("-"), None)]
    #[case(Some("none"), None)]
    #[case(Some("legacy"), None)]
    #[case(Some(""), None)]
    #[case(None, None)]
    #[case(Some("/home"), Some("/home"))]
    fn test_mountpoint_normalization(#[case] raw: Option<&str>, #[case] expected: Option<&str>) {
        let record = MountpointRecord::new("tank/home", raw);
        assert_eq!(record.mountpoint.as_deref(), expected);
    }

    #[test]
    fn test_fault_messages() {
        assert_eq!(PlanFault::NoBackupSnapshots.to_string(), "no backup snapshots :(");
        let fault = PlanFault::NotOnSource {
            snapshot: Snapshot::new("a2"),
        };
        assert_eq!(fault.to_string(), "last backup snapshot [a2] is not on source :(");
    }

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("zfs")
            .args(["send", "tank/a@snap 1"])
            .pipe(CommandSpec::new("zfs").args(["recv", "-F", "backup/a"]));
        assert!(spec.is_pipeline());
        assert_eq!(spec.to_string(), "zfs send 'tank/a@snap 1' | zfs recv -F backup/a");
    }

    #[test]
    fn test_step_classification() {
        assert!(ReplicationStep::InitialSend { snapshot: "a1".into() }.is_transfer());
        assert!(!ReplicationStep::UpToDate.is_transfer());
        assert!(!ReplicationStep::CreateFilesystem { target: "b/a".into() }.is_transfer());
        assert!(ReplicationStep::Error {
            reason: PlanFault::NoBackupSnapshots
        }
        .is_error());
    }
}
