//! Error taxonomy for the label store
//!
//! Every mutating operation is synchronous and returns a status rather
//! than panicking; most operations leave state unchanged on failure, so
//! callers can check and react immediately. Allocation failures surface
//! as [`LabelError::Memory`] via `Vec::try_reserve` at every point
//! backing storage grows.

use std::collections::TryReserveError;

/// Error type for label store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelError {
    /// Malformed argument: bad range (max < min, stride < 1) or an
    /// invalid identifier
    Argument,
    /// The identifier or object is already present
    AlreadyExists,
    /// The identifier or object is not present
    NotFound,
    /// Backing storage could not be grown
    Memory,
}

impl std::fmt::Display for LabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Argument => write!(f, "Invalid argument"),
            Self::AlreadyExists => write!(f, "Already exists"),
            Self::NotFound => write!(f, "Not found"),
            Self::Memory => write!(f, "Out of memory"),
        }
    }
}

impl std::error::Error for LabelError {}

impl From<TryReserveError> for LabelError {
    fn from(_: TryReserveError) -> Self {
        Self::Memory
    }
}

/// Result alias used throughout the crate
pub type LabelResult<T> = Result<T, LabelError>;
