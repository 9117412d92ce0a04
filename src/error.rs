use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by flag evaluation and the components wrapping it.
///
/// Expected edge cases during matching (missing attributes, bad regexes,
/// unknown operators) are boolean outcomes, not errors. These variants cover
/// the failures callers must be able to tell apart: missing data, misuse,
/// back-pressure, and broken storage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("flag not found: {key}")]
    FlagNotFound { key: String },

    #[error("flag {key} is of type {actual}, not {requested}")]
    TypeMismatch {
        key: String,
        requested: &'static str,
        actual: &'static str,
    },

    #[error("rate limit exceeded for {scope}, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// "global" or the flag key the per-flag bucket rejected.
        scope: String,
        retry_after: Option<Duration>,
    },

    #[error("circuit breaker {name} is open, retry after {retry_after:?}")]
    CircuitOpen {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("Circular segment reference detected: segment {segment_id} already in chain {chain:?}")]
    CircularSegmentReference { segment_id: Uuid, chain: Vec<Uuid> },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures from the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate {kind} {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}
