//! Configuration value types for snapferry
//!
//! Type-safe wrappers for tunables that are shared between the configuration
//! layer and the executor.

/// Upper bound on the number of filesystem chains transferring at once
///
/// The default places no bound: every filesystem in the plan gets its own
/// chain immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConcurrencyLimit(Option<usize>);

impl ConcurrencyLimit {
    /// Maximum accepted bound
    pub const MAX: usize = 1024;

    /// No bound on concurrent chains
    pub const fn unbounded() -> Self {
        Self(None)
    }

    /// Create a bounded limit with validation
    pub fn bounded(limit: usize) -> Result<Self, String> {
        if limit == 0 {
            Err("Concurrency limit must be greater than 0".to_string())
        } else if limit > Self::MAX {
            Err(format!("Concurrency limit {} exceeds maximum {}", limit, Self::MAX))
        } else {
            Ok(Self(Some(limit)))
        }
    }

    /// Create a limit from an optional bound
    pub fn from_option(limit: Option<usize>) -> Result<Self, String> {
        limit.map_or(Ok(Self::unbounded()), Self::bounded)
    }

    /// The bound, `None` when unbounded
    pub fn get(self) -> Option<usize> {
        self.0
    }

    /// Whether chains are unbounded
    pub fn is_unbounded(self) -> bool {
        self.0.is_none()
    }
}
