//! Result type alias for snapferry operations

use crate::Error;

/// Result type alias for snapferry operations
pub type Result<T> = std::result::Result<T, Error>;
