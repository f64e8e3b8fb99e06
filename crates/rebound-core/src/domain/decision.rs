//! Decision model: what the retry engine wants to happen to a failed job.

use std::time::Duration;

use super::state::JobState;

/// The outcome of one state election for a failed job.
///
/// A closed set: the engine returns one of these and [`RetryDecision::apply`]
/// is the single place that turns it into a candidate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`.
    Schedule { delay: Duration, reason: String },

    /// Retry right away.
    Enqueue { reason: String },

    /// Give up and delete the job.
    Delete { reason: String },

    /// Leave the candidate state untouched (the job stays failed).
    NoChange,
}

impl RetryDecision {
    /// Build a retry decision. A zero delay means "enqueue now".
    pub fn retry(delay: Duration, reason: String) -> Self {
        if delay.is_zero() {
            RetryDecision::Enqueue { reason }
        } else {
            RetryDecision::Schedule { delay, reason }
        }
    }

    /// Overwrite `candidate` according to this decision.
    pub fn apply(self, candidate: &mut JobState) {
        match self {
            RetryDecision::Schedule { delay, reason } => {
                *candidate = JobState::scheduled(delay, reason);
            }
            RetryDecision::Enqueue { reason } => {
                *candidate = JobState::enqueued(reason);
            }
            RetryDecision::Delete { reason } => {
                *candidate = JobState::deleted(reason);
            }
            RetryDecision::NoChange => {}
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            RetryDecision::Schedule { .. } | RetryDecision::Enqueue { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::{JobFailure, StateName};

    fn failed() -> JobState {
        JobState::failed(JobFailure::new("E", "boom"))
    }

    #[test]
    fn zero_delay_retry_becomes_enqueue() {
        let decision = RetryDecision::retry(Duration::ZERO, "now".into());
        assert_eq!(decision, RetryDecision::Enqueue { reason: "now".into() });
        assert!(decision.is_retry());
    }

    #[test]
    fn apply_overwrites_candidate() {
        let mut candidate = failed();
        RetryDecision::retry(Duration::from_secs(15), "later".into()).apply(&mut candidate);
        assert_eq!(candidate, JobState::scheduled(Duration::from_secs(15), "later"));

        let mut candidate = failed();
        RetryDecision::Delete { reason: "gone".into() }.apply(&mut candidate);
        assert_eq!(candidate.name(), StateName::Deleted);
        assert_eq!(candidate.reason(), Some("gone"));
    }

    #[test]
    fn no_change_keeps_failed_candidate() {
        let mut candidate = failed();
        RetryDecision::NoChange.apply(&mut candidate);
        assert_eq!(candidate, failed());
        assert!(!RetryDecision::NoChange.is_retry());
    }
}
