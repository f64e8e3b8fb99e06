//! Job states observed and elected by the failure-handling filters.
//!
//! The job runtime owns the full lifecycle. Only the states a retry policy
//! reads or produces carry data here.
//!
//! Transitions driven by the retry engine:
//! - Failed -> Scheduled (retry after a delay)
//! - Failed -> Enqueued (retry immediately)
//! - Failed -> Deleted (attempts exhausted, delete policy)
//! - Failed -> Failed (attempts exhausted, fail policy)

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The error that made a job fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Error type name, e.g. `io::Error` or `SmtpTimeout`.
    pub kind: String,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Capture any std error as a failure.
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// State names, used where only the name of a state is known
/// (e.g. the old state during an unapply callback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateName {
    Enqueued,
    Scheduled,
    Processing,
    Succeeded,
    Failed,
    Deleted,
}

impl StateName {
    pub fn as_str(self) -> &'static str {
        match self {
            StateName::Enqueued => "Enqueued",
            StateName::Scheduled => "Scheduled",
            StateName::Processing => "Processing",
            StateName::Succeeded => "Succeeded",
            StateName::Failed => "Failed",
            StateName::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job state, as elected and then applied by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be picked up by a worker.
    Enqueued { reason: Option<String> },

    /// Waiting for `delay` before it is enqueued again.
    Scheduled {
        #[serde(with = "delay_secs")]
        delay: Duration,
        reason: Option<String>,
    },

    Processing,

    Succeeded,

    Failed {
        failure: JobFailure,
        reason: Option<String>,
    },

    Deleted { reason: Option<String> },
}

impl JobState {
    pub fn enqueued(reason: impl Into<String>) -> Self {
        JobState::Enqueued {
            reason: Some(reason.into()),
        }
    }

    pub fn scheduled(delay: Duration, reason: impl Into<String>) -> Self {
        JobState::Scheduled {
            delay,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(failure: JobFailure) -> Self {
        JobState::Failed {
            failure,
            reason: None,
        }
    }

    pub fn deleted(reason: impl Into<String>) -> Self {
        JobState::Deleted {
            reason: Some(reason.into()),
        }
    }

    pub fn name(&self) -> StateName {
        match self {
            JobState::Enqueued { .. } => StateName::Enqueued,
            JobState::Scheduled { .. } => StateName::Scheduled,
            JobState::Processing => StateName::Processing,
            JobState::Succeeded => StateName::Succeeded,
            JobState::Failed { .. } => StateName::Failed,
            JobState::Deleted { .. } => StateName::Deleted,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            JobState::Enqueued { reason }
            | JobState::Scheduled { reason, .. }
            | JobState::Failed { reason, .. }
            | JobState::Deleted { reason } => reason.as_deref(),
            JobState::Processing | JobState::Succeeded => None,
        }
    }

    /// Final states make the job eligible for expiration.
    pub fn is_final(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Deleted { .. })
    }
}

mod delay_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(delay.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
