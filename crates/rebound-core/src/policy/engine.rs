//! Retry decision engine: elects the next state of a failed job.
//!
//! Given the job's attempt counter `c`, the engine works with
//! `retry_attempt = c + 1`:
//! - `retry_attempt <= attempts`: store the new counter and retry
//!   (scheduled, or enqueued when the delay is zero)
//! - exhausted with [`AttemptsExceededAction::Delete`]: delete the job
//! - exhausted with [`AttemptsExceededAction::Fail`]: leave it failed
//!
//! The counter lives in the job's parameters, not here: one engine serves
//! every job of its policy key.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{error, warn};

use super::configuration::{AttemptsExceededAction, RetryConfiguration};
use crate::domain::{JobFailure, JobState, PolicyKey, RetryDecision, StorageError};
use crate::ports::ElectStateContext;

/// Job parameter holding the number of retries already scheduled.
pub const RETRY_COUNT_PARAMETER: &str = "RetryCount";

/// Every retry reason starts with this; the retry index keys off it.
pub const RETRY_REASON_PREFIX: &str = "Retry attempt";

pub const EXCEEDED_REASON: &str = "Exceeded the maximum number of retry attempts.";
pub const DISABLED_REASON: &str = "Retries were disabled for this job.";

const MAX_MESSAGE_LENGTH: usize = 50;

/// Cut `message` to 49 characters plus `…` when it is longer than 50.
pub fn truncate_message(message: &str) -> Cow<'_, str> {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return Cow::Borrowed(message);
    }
    let mut short: String = message.chars().take(MAX_MESSAGE_LENGTH - 1).collect();
    short.push('…');
    Cow::Owned(short)
}

pub fn retry_reason(retry_attempt: u32, attempts: u32, failure: &JobFailure) -> String {
    format!(
        "{RETRY_REASON_PREFIX} {retry_attempt} of {attempts}: {}",
        truncate_message(&failure.message)
    )
}

#[derive(Debug, Clone)]
pub struct RetryDecisionEngine {
    policy_key: PolicyKey,
    configuration: Arc<RetryConfiguration>,
}

impl RetryDecisionEngine {
    pub fn new(policy_key: PolicyKey, configuration: Arc<RetryConfiguration>) -> Self {
        Self {
            policy_key,
            configuration,
        }
    }

    pub fn configuration(&self) -> &Arc<RetryConfiguration> {
        &self.configuration
    }

    /// Decide what to do with the candidate state.
    ///
    /// Only `Failed` candidates are considered; anything else is
    /// [`RetryDecision::NoChange`]. On a retry the incremented counter is
    /// written back before returning.
    pub fn decide(&self, context: &ElectStateContext<'_>) -> Result<RetryDecision, StorageError> {
        let JobState::Failed { failure, .. } = &context.candidate_state else {
            return Ok(RetryDecision::NoChange);
        };

        let settings = self.configuration.snapshot();
        let attempts = settings.attempts();
        let retry_count: u32 = context.get_job_parameter(RETRY_COUNT_PARAMETER)?;
        let retry_attempt = retry_count.saturating_add(1);

        if retry_attempt <= attempts {
            context.set_job_parameter(RETRY_COUNT_PARAMETER, &retry_attempt)?;

            let delay = settings.delay().delay_for(retry_attempt);
            let reason = retry_reason(retry_attempt, attempts, failure);

            if settings.log_events() {
                warn!(
                    job_id = %context.job_id,
                    policy_key = %self.policy_key,
                    retry_attempt,
                    attempts,
                    delay_secs = delay.as_secs(),
                    error = %failure,
                    "failed to process the job, retry attempt {retry_attempt} of {attempts} will be performed in {delay:?}"
                );
            }
            return Ok(RetryDecision::retry(delay, reason));
        }

        match settings.on_attempts_exceeded() {
            AttemptsExceededAction::Delete => {
                let reason = if attempts > 0 {
                    EXCEEDED_REASON
                } else {
                    DISABLED_REASON
                };
                if settings.log_events() {
                    warn!(
                        job_id = %context.job_id,
                        policy_key = %self.policy_key,
                        attempts,
                        error = %failure,
                        "failed to process the job, deleted because the retry attempt count exceeded {attempts}"
                    );
                }
                Ok(RetryDecision::Delete {
                    reason: reason.to_string(),
                })
            }
            AttemptsExceededAction::Fail => {
                if settings.log_events() {
                    error!(
                        job_id = %context.job_id,
                        policy_key = %self.policy_key,
                        attempts,
                        error = %failure,
                        "failed to process the job"
                    );
                }
                Ok(RetryDecision::NoChange)
            }
        }
    }

    /// Decide and overwrite the candidate state in one step.
    pub fn elect(&self, context: &mut ElectStateContext<'_>) -> Result<RetryDecision, StorageError> {
        let decision = self.decide(context)?;
        decision.clone().apply(&mut context.candidate_state);
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, StateName};
    use crate::impls::InMemoryStorage;
    use crate::policy::backoff::polynomial_delay;
    use crate::ports::JobParameterStore;
    use rstest::rstest;
    use std::time::Duration;

    fn engine(configure: impl FnOnce(&RetryConfiguration)) -> RetryDecisionEngine {
        let config = RetryConfiguration::new();
        config.set_log_events(false);
        configure(&config);
        RetryDecisionEngine::new(PolicyKey::new("email-job"), Arc::new(config))
    }

    fn fail_once(
        engine: &RetryDecisionEngine,
        store: &InMemoryStorage,
        job_id: JobId,
        message: &str,
    ) -> (RetryDecision, JobState) {
        let mut context = ElectStateContext::new(
            job_id,
            Some(StateName::Processing),
            JobState::failed(JobFailure::new("SmtpError", message)),
            store,
        );
        let decision = engine.elect(&mut context).unwrap();
        (decision, context.candidate_state)
    }

    #[rstest]
    #[case::short("connection refused".to_string(), "connection refused".to_string())]
    #[case::exactly_fifty("x".repeat(50), "x".repeat(50))]
    #[case::fifty_one("y".repeat(51), format!("{}…", "y".repeat(49)))]
    fn messages_are_truncated_past_fifty_chars(#[case] message: String, #[case] expected: String) {
        assert_eq!(truncate_message(&message), expected);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let message = "é".repeat(60);
        let short = truncate_message(&message);
        assert_eq!(short.chars().count(), 50);
        assert!(short.ends_with('…'));
    }

    #[test]
    fn first_failure_with_default_backoff_and_no_jitter_waits_fifteen_seconds() {
        let engine = engine(|c| c.set_delay_function(|attempt| polynomial_delay(attempt, 0)));
        let store = InMemoryStorage::new();

        let (decision, state) = fail_once(&engine, &store, JobId::generate(), "boom");

        assert_eq!(
            decision,
            RetryDecision::Schedule {
                delay: Duration::from_secs(15),
                reason: "Retry attempt 1 of 10: boom".into(),
            }
        );
        assert_eq!(state, JobState::scheduled(Duration::from_secs(15), "Retry attempt 1 of 10: boom"));
    }

    #[test]
    fn schedule_delays_follow_the_attempt_counter() {
        let engine = engine(|c| {
            c.set_attempts(6).unwrap();
            c.set_delay_schedule(vec![1, 2, 3]).unwrap();
        });
        let store = InMemoryStorage::new();
        let job_id = JobId::generate();

        let delays: Vec<_> = (0..6)
            .map(|_| match fail_once(&engine, &store, job_id, "boom").0 {
                RetryDecision::Schedule { delay, .. } => delay.as_secs(),
                other => panic!("unexpected decision {other:?}"),
            })
            .collect();

        assert_eq!(delays, vec![1, 2, 3, 3, 3, 3]);
        assert_eq!(store.get_job_parameter(job_id, RETRY_COUNT_PARAMETER).unwrap().as_deref(), Some("6"));
    }

    #[test]
    fn zero_delay_enqueues_immediately() {
        let engine = engine(|c| c.set_delay_schedule(vec![0]).unwrap());
        let store = InMemoryStorage::new();

        let (_, state) = fail_once(&engine, &store, JobId::generate(), "flaky");

        assert_eq!(state, JobState::enqueued("Retry attempt 1 of 10: flaky"));
    }

    #[test]
    fn email_job_scenario_retries_three_times_then_stays_failed() {
        let engine = engine(|c| {
            c.set_attempts(3).unwrap();
            c.set_delay_function(|attempt| polynomial_delay(attempt, 0));
        });
        let store = InMemoryStorage::new();
        let job_id = JobId::generate();

        let states: Vec<_> = (0..4).map(|_| fail_once(&engine, &store, job_id, "smtp down").1).collect();

        assert_eq!(states[0], JobState::scheduled(Duration::from_secs(15), "Retry attempt 1 of 3: smtp down"));
        assert_eq!(states[1], JobState::scheduled(Duration::from_secs(16), "Retry attempt 2 of 3: smtp down"));
        assert_eq!(states[2], JobState::scheduled(Duration::from_secs(31), "Retry attempt 3 of 3: smtp down"));
        assert_eq!(states[3], JobState::failed(JobFailure::new("SmtpError", "smtp down")));
    }

    #[test]
    fn exhausted_fail_policy_leaves_counter_untouched() {
        let engine = engine(|c| c.set_attempts(1).unwrap());
        let store = InMemoryStorage::new();
        let job_id = JobId::generate();

        fail_once(&engine, &store, job_id, "boom");
        let (decision, _) = fail_once(&engine, &store, job_id, "boom");
        let (decision_again, _) = fail_once(&engine, &store, job_id, "boom");

        assert_eq!(decision, RetryDecision::NoChange);
        assert_eq!(decision_again, RetryDecision::NoChange);
        assert_eq!(store.get_job_parameter(job_id, RETRY_COUNT_PARAMETER).unwrap().as_deref(), Some("1"));
    }

    #[rstest]
    #[case::exceeded(2, EXCEEDED_REASON)]
    #[case::disabled(0, DISABLED_REASON)]
    fn exhausted_delete_policy_deletes_with_reason(#[case] attempts: i64, #[case] reason: &str) {
        let engine = engine(|c| {
            c.set_attempts(attempts).unwrap();
            c.set_on_attempts_exceeded(AttemptsExceededAction::Delete);
        });
        let store = InMemoryStorage::new();
        let job_id = JobId::generate();

        let mut last = None;
        for _ in 0..=attempts {
            last = Some(fail_once(&engine, &store, job_id, "boom"));
        }

        let (decision, state) = last.unwrap();
        assert_eq!(decision, RetryDecision::Delete { reason: reason.into() });
        assert_eq!(state, JobState::deleted(reason));
    }

    #[test]
    fn counter_is_scoped_to_each_job() {
        let engine = engine(|c| c.set_attempts(1).unwrap());
        let store = InMemoryStorage::new();

        let (first, _) = fail_once(&engine, &store, JobId::generate(), "boom");
        let (second, _) = fail_once(&engine, &store, JobId::generate(), "boom");

        assert!(first.is_retry());
        assert!(second.is_retry());
    }

    #[test]
    fn non_failed_candidates_are_ignored() {
        let engine = engine(|_| {});
        let store = InMemoryStorage::new();
        let job_id = JobId::generate();
        let mut context = ElectStateContext::new(job_id, None, JobState::Succeeded, &store);

        assert_eq!(engine.elect(&mut context).unwrap(), RetryDecision::NoChange);
        assert_eq!(context.candidate_state, JobState::Succeeded);
        assert!(store.get_job_parameter(job_id, RETRY_COUNT_PARAMETER).unwrap().is_none());
    }

    #[test]
    fn undecodable_counter_propagates_storage_error() {
        let engine = engine(|_| {});
        let store = InMemoryStorage::new();
        let job_id = JobId::generate();
        store
            .set_job_parameter(job_id, RETRY_COUNT_PARAMETER, "\"three\"".into())
            .unwrap();
        let context = ElectStateContext::new(
            job_id,
            None,
            JobState::failed(JobFailure::new("E", "boom")),
            &store,
        );

        assert!(matches!(engine.decide(&context), Err(StorageError::Parameter { .. })));
    }
}
