//! StatePipeline - 状態遷移の実行
//!
//! # フロー
//! 1. ElectStateFilter を order 順に実行し、候補状態を確定
//! 2. 1 つのトランザクション内で
//!    - 旧状態の unapply
//!    - 新状態の記録
//!    - ApplyStateFilter の apply
//!    - 最終状態なら expire、それ以外は persist
//! 3. commit

use std::sync::Arc;

use tracing::debug;

use crate::domain::{JobFailure, JobId, JobState, StorageError};
use crate::impls::InMemoryStorage;
use crate::ports::{
    ApplyStateContext, ApplyStateFilter, ElectStateContext, ElectStateFilter, JobStorage,
};

/// Reason recorded when a due retry is moved back to the queue.
pub const TRIGGERED_REASON: &str = "Triggered by the delayed job scheduler";

pub struct StatePipeline<S: JobStorage> {
    storage: Arc<S>,
    elect_filters: Vec<Arc<dyn ElectStateFilter>>,
    apply_filters: Vec<Arc<dyn ApplyStateFilter>>,
}

impl<S: JobStorage> StatePipeline<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            elect_filters: Vec::new(),
            apply_filters: Vec::new(),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn with_elect_filter(mut self, filter: Arc<dyn ElectStateFilter>) -> Self {
        self.elect_filters.push(filter);
        self.elect_filters.sort_by_key(|filter| filter.order());
        self
    }

    pub fn with_apply_filter(mut self, filter: Arc<dyn ApplyStateFilter>) -> Self {
        self.apply_filters.push(filter);
        self.apply_filters.sort_by_key(|filter| filter.order());
        self
    }

    /// Register a filter that takes part in both election and apply.
    pub fn with_filter<F>(self, filter: Arc<F>) -> Self
    where
        F: ElectStateFilter + ApplyStateFilter + 'static,
    {
        self.with_elect_filter(filter.clone()).with_apply_filter(filter)
    }

    /// Move the job towards `candidate`. Returns the state actually applied,
    /// which election filters may have replaced.
    pub fn change_state(&self, job_id: JobId, candidate: JobState) -> Result<JobState, StorageError> {
        let current = self
            .storage
            .current_state(job_id)?
            .ok_or(StorageError::JobNotFound(job_id))?;
        let old_state_name = Some(current.name());

        let mut election = ElectStateContext::new(job_id, old_state_name, candidate, self.storage.as_ref());
        for filter in &self.elect_filters {
            filter.on_state_election(&mut election)?;
        }
        let elected = election.candidate_state;

        let mut context = ApplyStateContext::new(job_id, old_state_name, elected.clone());
        let mut transaction = self.storage.begin_transaction();
        for filter in &self.apply_filters {
            filter.on_state_unapplied(&mut context, transaction.as_mut());
        }
        transaction.set_job_state(job_id, elected.clone())?;
        for filter in &self.apply_filters {
            filter.on_state_applied(&mut context, transaction.as_mut());
        }
        if elected.is_final() {
            transaction.expire_job(job_id, context.job_expiration_timeout)?;
        } else {
            transaction.persist_job(job_id)?;
        }
        transaction.commit()?;

        debug!(
            %job_id,
            from = %current.name(),
            to = %elected.name(),
            reason = elected.reason().unwrap_or_default(),
            "job state changed"
        );
        Ok(elected)
    }

    pub fn start_processing(&self, job_id: JobId) -> Result<JobState, StorageError> {
        self.change_state(job_id, JobState::Processing)
    }

    pub fn succeed(&self, job_id: JobId) -> Result<JobState, StorageError> {
        self.change_state(job_id, JobState::Succeeded)
    }

    /// Report a failed run. The registered retry policy decides what happens next.
    pub fn fail_job(&self, job_id: JobId, failure: JobFailure) -> Result<JobState, StorageError> {
        self.change_state(job_id, JobState::failed(failure))
    }
}

impl StatePipeline<InMemoryStorage> {
    /// Move the due scheduled jobs of `job_type` back to the queue.
    ///
    /// Jobs of other types are left for the pipeline that owns them.
    pub fn promote_due(&self, job_type: &str) -> Result<Vec<JobId>, StorageError> {
        let due = self.storage.due_scheduled_jobs_of(job_type);
        for job_id in &due {
            self.change_state(*job_id, JobState::enqueued(TRIGGERED_REASON))?;
        }
        Ok(due)
    }
}

impl<S: JobStorage> std::fmt::Debug for StatePipeline<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePipeline")
            .field("elect_filters", &self.elect_filters.len())
            .field("apply_filters", &self.apply_filters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PolicyKey, StateName};
    use crate::policy::{
        AttemptsExceededAction, ExpirationPolicy, PersistedRetryPolicy, RETRIES_SET,
        RETRY_COUNT_PARAMETER, polynomial_delay, save_override,
    };
    use crate::ports::{Clock, FixedClock, JobParameterStore};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        clock: Arc<FixedClock>,
        storage: Arc<InMemoryStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
            let storage = Arc::new(InMemoryStorage::with_clock(clock.clone()));
            Self { clock, storage }
        }

        fn pipeline(&self, policy: PersistedRetryPolicy) -> StatePipeline<InMemoryStorage> {
            policy.configuration().set_log_events(false);
            StatePipeline::new(self.storage.clone())
                .with_filter(Arc::new(policy))
                .with_apply_filter(Arc::new(ExpirationPolicy::from_days(7)))
        }

        fn run_and_fail(&self, pipeline: &StatePipeline<InMemoryStorage>, job_id: JobId) -> JobState {
            pipeline.start_processing(job_id).unwrap();
            pipeline
                .fail_job(job_id, JobFailure::new("SmtpError", "smtp timeout"))
                .unwrap()
        }

        fn wait_until_due(&self, pipeline: &StatePipeline<InMemoryStorage>, job_id: JobId) {
            let record = self.storage.job(job_id).unwrap();
            self.clock.set(record.enqueue_at.unwrap());
            assert_eq!(pipeline.promote_due(&record.job_type).unwrap(), vec![job_id]);
        }
    }

    #[test]
    fn email_job_is_retried_three_times_then_stays_failed() {
        let fixture = Fixture::new();
        let policy = PersistedRetryPolicy::new("email-job", Some(3), None, fixture.storage.as_ref()).unwrap();
        policy
            .configuration()
            .set_delay_function(|attempt| polynomial_delay(attempt, 0));
        let pipeline = fixture.pipeline(policy);
        let job_id = fixture.storage.create_job("email", json!({"to": "a@example.com"}));
        let id = job_id.to_string();

        for (attempt, delay) in [(1, 15), (2, 16), (3, 31)] {
            let state = fixture.run_and_fail(&pipeline, job_id);
            assert_eq!(state.name(), StateName::Scheduled);
            assert_eq!(state, JobState::Scheduled {
                delay: Duration::from_secs(delay),
                reason: Some(format!("Retry attempt {attempt} of 3: smtp timeout")),
            });
            assert!(fixture.storage.set_contains(RETRIES_SET, &id));

            fixture.wait_until_due(&pipeline, job_id);
            assert!(!fixture.storage.set_contains(RETRIES_SET, &id));
        }

        let state = fixture.run_and_fail(&pipeline, job_id);

        assert_eq!(state.name(), StateName::Failed);
        assert!(fixture.storage.set_members(RETRIES_SET).is_empty());
        assert_eq!(
            fixture.storage.get_job_parameter(job_id, RETRY_COUNT_PARAMETER).unwrap().as_deref(),
            Some("3")
        );
        assert!(fixture.storage.job(job_id).unwrap().expire_at.is_none());
    }

    #[test]
    fn exhausted_job_is_deleted_and_expires() {
        let fixture = Fixture::new();
        let policy = PersistedRetryPolicy::new("cleanup", Some(1), Some(vec![5]), fixture.storage.as_ref()).unwrap();
        policy
            .configuration()
            .set_on_attempts_exceeded(AttemptsExceededAction::Delete);
        let pipeline = fixture.pipeline(policy);
        let job_id = fixture.storage.create_job("cleanup", json!(null));

        assert_eq!(fixture.run_and_fail(&pipeline, job_id).name(), StateName::Scheduled);
        fixture.wait_until_due(&pipeline, job_id);
        let state = fixture.run_and_fail(&pipeline, job_id);

        assert_eq!(state.name(), StateName::Deleted);
        let record = fixture.storage.job(job_id).unwrap();
        assert_eq!(
            record.expire_at,
            Some(fixture.clock.now() + chrono::Duration::days(7))
        );
    }

    #[test]
    fn zero_delay_retry_goes_straight_back_to_the_queue() {
        let fixture = Fixture::new();
        save_override(fixture.storage.as_ref(), &PolicyKey::new("email-job"), 2, Some(vec![0])).unwrap();
        let policy = PersistedRetryPolicy::new("email-job", None, None, fixture.storage.as_ref()).unwrap();
        let pipeline = fixture.pipeline(policy);
        let job_id = fixture.storage.create_job("email", json!({}));

        let state = fixture.run_and_fail(&pipeline, job_id);

        assert_eq!(state, JobState::enqueued("Retry attempt 1 of 2: smtp timeout"));
        assert_eq!(fixture.storage.enqueued_jobs(), vec![job_id]);
        assert!(fixture.storage.set_members(RETRIES_SET).is_empty());
    }

    #[test]
    fn succeeded_jobs_get_the_retention_timeout() {
        let fixture = Fixture::new();
        let policy = PersistedRetryPolicy::new("email-job", None, None, fixture.storage.as_ref()).unwrap();
        let pipeline = fixture.pipeline(policy);
        let job_id = fixture.storage.create_job("email", json!({}));

        pipeline.start_processing(job_id).unwrap();
        pipeline.succeed(job_id).unwrap();

        let record = fixture.storage.job(job_id).unwrap();
        assert_eq!(record.state, JobState::Succeeded);
        assert_eq!(record.history.len(), 3);
        assert!(record.expire_at.is_some());
    }

    #[test]
    fn unknown_job_is_rejected() {
        let fixture = Fixture::new();
        let pipeline = StatePipeline::new(fixture.storage.clone());
        let job_id = JobId::generate();

        assert!(matches!(
            pipeline.succeed(job_id),
            Err(StorageError::JobNotFound(id)) if id == job_id
        ));
    }

    #[test]
    fn without_a_policy_failures_stay_failed() {
        let fixture = Fixture::new();
        let pipeline = StatePipeline::new(fixture.storage.clone());
        let job_id = fixture.storage.create_job("email", json!({}));

        let state = fixture.run_and_fail(&pipeline, job_id);

        assert_eq!(state.name(), StateName::Failed);
    }

    #[test]
    fn promotion_only_touches_its_own_job_type() {
        let fixture = Fixture::new();
        let email_policy = PersistedRetryPolicy::new("email", Some(3), Some(vec![5]), fixture.storage.as_ref()).unwrap();
        let report_policy = PersistedRetryPolicy::new("report", Some(3), Some(vec![5]), fixture.storage.as_ref()).unwrap();
        let email = fixture.pipeline(email_policy);
        let report = fixture.pipeline(report_policy);
        let email_job = fixture.storage.create_job("email", json!({}));
        let report_job = fixture.storage.create_job("report", json!({}));

        fixture.run_and_fail(&email, email_job);
        fixture.run_and_fail(&report, report_job);
        fixture.clock.advance(chrono::Duration::seconds(5));

        assert_eq!(email.promote_due("email").unwrap(), vec![email_job]);
        assert_eq!(fixture.storage.job(report_job).unwrap().state.name(), StateName::Scheduled);
        assert!(fixture.storage.set_contains(RETRIES_SET, &report_job.to_string()));

        assert_eq!(report.promote_due("report").unwrap(), vec![report_job]);
        assert!(fixture.storage.set_members(RETRIES_SET).is_empty());
    }
}
