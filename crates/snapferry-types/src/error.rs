//! Error types and handling for snapferry
//!
//! Errors fall into three families: configuration problems caught at the
//! boundary, planning problems that abort the whole run before any side
//! effect, and execution problems reported per filesystem after the fact.

use crate::types::{Filesystem, PlanFault, Snapshot};

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - operation can continue
    Low,
    /// Medium severity - the affected command failed
    Medium,
    /// High severity - the affected filesystem chain stops
    High,
    /// Critical severity - the run must not touch the destination
    Critical,
}

/// A filesystem that could not be planned, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlanFailure {
    /// Source filesystem
    pub filesystem: Filesystem,
    /// What the planner found
    pub fault: PlanFault,
}

impl PlanFailure {
    /// Convert into the matching standalone error
    pub fn to_error(&self) -> Error {
        match &self.fault {
            PlanFault::NoBackupSnapshots => Error::EmptyBackup {
                filesystem: self.filesystem.clone(),
            },
            PlanFault::NotOnSource { snapshot } => Error::Divergence {
                filesystem: self.filesystem.clone(),
                snapshot: snapshot.clone(),
            },
        }
    }
}

impl std::fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.filesystem, self.fault)
    }
}

/// Main error type for snapferry operations
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    /// Required configuration is missing or invalid
    #[error("{message}")]
    Validation {
        /// What is missing
        message: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },

    /// The newest backup snapshot is not present on the source
    #[error("{filesystem}: last backup snapshot [{snapshot}] is not on source")]
    Divergence {
        /// Source filesystem
        filesystem: Filesystem,
        /// Newest backup snapshot
        snapshot: Snapshot,
    },

    /// The backup filesystem exists but has no snapshots
    #[error("{filesystem}: no backup snapshots")]
    EmptyBackup {
        /// Source filesystem
        filesystem: Filesystem,
    },

    /// One or more filesystems failed planning
    #[error("planning failed for {} filesystem(s)", .failures.len())]
    Preflight {
        /// Every failing filesystem with its reason
        failures: Vec<PlanFailure>,
    },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed ({status}): {stderr}")]
    Command {
        /// Rendered command line
        command: String,
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// A replication step failed for a filesystem
    #[error("{filesystem}: {message}")]
    Execution {
        /// Filesystem whose chain failed
        filesystem: Filesystem,
        /// Underlying failure
        message: String,
    },

    /// Output of an external command could not be understood
    #[error("Parse error: {message}")]
    Parse {
        /// Error message
        message: String,
    },

    /// I/O operation failed
    #[error("I/O error: {message}")]
    Io {
        /// Error message from the I/O operation
        message: String,
    },

    /// Generic error with custom message
    #[error("{message}")]
    Other {
        /// Custom error message
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Validation errors
    Validation,
    /// Configuration errors
    Config,
    /// History divergence between source and backup
    Divergence,
    /// Backup filesystem without snapshots
    EmptyBackup,
    /// Aggregate planning failure
    Preflight,
    /// External command failure
    Command,
    /// Replication step failure
    Execution,
    /// Unparseable command output
    Parse,
    /// I/O related errors
    Io,
    /// Other errors
    Other,
}

impl ErrorKind {
    /// Stable snake_case name for machine-readable output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Config => "config",
            Self::Divergence => "divergence",
            Self::EmptyBackup => "empty_backup",
            Self::Preflight => "preflight",
            Self::Command => "command",
            Self::Execution => "execution",
            Self::Parse => "parse",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Config { .. } => ErrorKind::Config,
            Self::Divergence { .. } => ErrorKind::Divergence,
            Self::EmptyBackup { .. } => ErrorKind::EmptyBackup,
            Self::Preflight { .. } => ErrorKind::Preflight,
            Self::Command { .. } => ErrorKind::Command,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Io { .. } => ErrorKind::Io,
            Self::Other { .. } => ErrorKind::Other,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation { .. } | Self::Config { .. } => ErrorSeverity::Critical,
            Self::Divergence { .. } | Self::EmptyBackup { .. } | Self::Preflight { .. } => {
                ErrorSeverity::Critical
            }
            Self::Execution { .. } => ErrorSeverity::High,
            Self::Parse { .. } => ErrorSeverity::High,
            Self::Command { .. } | Self::Io { .. } | Self::Other { .. } => ErrorSeverity::Medium,
        }
    }

    /// Whether this error was raised while planning, before any side effect
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            Self::Divergence { .. } | Self::EmptyBackup { .. } | Self::Preflight { .. }
        )
    }

    /// Whether a later run can resume past this error without operator action
    ///
    /// Failed transfers leave the destination valid but partial, and the next
    /// planning pass picks up from the newest received snapshot.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Command { .. } | Self::Execution { .. } | Self::Io { .. })
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new execution error for a filesystem
    pub fn execution<S: Into<String>>(filesystem: &Filesystem, message: S) -> Self {
        Self::Execution {
            filesystem: filesystem.clone(),
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
        }
    }
}
