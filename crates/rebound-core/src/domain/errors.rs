//! Errors raised by the retry policy and its storage ports.

use thiserror::Error;

use super::ids::JobId;

/// Invalid retry configuration. Raised at the moment of mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("attempts must be equal or greater than zero, got {0}")]
    NegativeAttempts(i64),

    #[error("attempts must fit in 32 bits, got {0}")]
    TooManyAttempts(i64),

    #[error("delay schedule must contain at least one value")]
    EmptyDelaySchedule,

    #[error("delay schedule must contain non-negative numbers, got {value} at index {index}")]
    NegativeDelay { index: usize, value: i64 },
}

/// Failure of the job storage the runtime hands to the filters.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job parameter '{name}' of {job_id} could not be decoded")]
    Parameter {
        job_id: JobId,
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A persisted override record that could not be used.
#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("invalid attempts value '{value}'")]
    InvalidAttempts {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid delay '{token}' in schedule")]
    InvalidDelay {
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Umbrella error for callers driving the runtime pieces.
#[derive(Debug, Error)]
pub enum ReboundError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("malformed persisted override: {0}")]
    Override(#[from] OverrideError),

    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
}
