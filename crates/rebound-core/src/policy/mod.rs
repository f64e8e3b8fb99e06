//! Persisted retry policy.
//!
//! [`PersistedRetryPolicy`] is what a job runtime registers for a job type:
//! - election: decides retry / delete / stay failed ([`engine`])
//! - apply/unapply: maintains the `retries` index ([`index`])
//!
//! Its configuration starts from compiled-in defaults, then takes the
//! override stored under `job-retry-{policy_key}` ([`persistence`]).

pub mod backoff;
pub mod configuration;
pub mod engine;
pub mod expiration;
pub mod index;
pub mod persistence;

use std::sync::Arc;

use crate::domain::{PolicyKey, ReboundError, RetryDecision, StorageError};
use crate::ports::{
    ApplyStateContext, ApplyStateFilter, ElectStateContext, ElectStateFilter, HashStore,
    WriteTransaction,
};

pub use backoff::{DelayFn, DelaySchedule, DelayStrategy, default_delay, polynomial_delay};
pub use configuration::{
    AttemptsExceededAction, DEFAULT_RETRY_ATTEMPTS, RetryConfiguration, RetrySettings,
};
pub use engine::{RETRY_COUNT_PARAMETER, RetryDecisionEngine};
pub use expiration::ExpirationPolicy;
pub use index::{RETRIES_SET, RetryIndexWriter};
pub use persistence::{PersistedOverride, clear_override, load_override, save_override};

/// Runs after filters with the default order.
pub const RETRY_FILTER_ORDER: i32 = 20;

#[derive(Debug, Clone)]
pub struct PersistedRetryPolicy {
    key: PolicyKey,
    configuration: Arc<RetryConfiguration>,
    engine: RetryDecisionEngine,
    index: RetryIndexWriter,
}

impl PersistedRetryPolicy {
    /// Build the policy for `key`.
    ///
    /// `default_attempts` falls back to [`DEFAULT_RETRY_ATTEMPTS`] and
    /// `default_delays` to the polynomial backoff. Invalid defaults and an
    /// unreadable store are errors; a malformed stored override is only logged.
    pub fn new(
        key: impl Into<PolicyKey>,
        default_attempts: Option<i64>,
        default_delays: Option<Vec<i64>>,
        store: &dyn HashStore,
    ) -> Result<Self, ReboundError> {
        let key = key.into();
        let configuration = RetryConfiguration::new();
        if let Some(attempts) = default_attempts {
            configuration.set_attempts(attempts)?;
        }
        if let Some(delays) = default_delays {
            configuration.set_delay_schedule(delays)?;
        }

        persistence::apply_persisted_override(store, &key, &configuration)?;

        let configuration = Arc::new(configuration);
        Ok(Self {
            engine: RetryDecisionEngine::new(key.clone(), Arc::clone(&configuration)),
            index: RetryIndexWriter::new(),
            key,
            configuration,
        })
    }

    pub fn key(&self) -> &PolicyKey {
        &self.key
    }

    /// Hash key of the persisted override for this policy.
    pub fn hash_key(&self) -> String {
        persistence::hash_key(&self.key)
    }

    pub fn configuration(&self) -> &RetryConfiguration {
        &self.configuration
    }

    /// Run the election without registering the policy in a pipeline.
    pub fn elect(&self, context: &mut ElectStateContext<'_>) -> Result<RetryDecision, StorageError> {
        self.engine.elect(context)
    }
}

impl ElectStateFilter for PersistedRetryPolicy {
    fn order(&self) -> i32 {
        RETRY_FILTER_ORDER
    }

    fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), StorageError> {
        self.engine.elect(context).map(|_| ())
    }
}

impl ApplyStateFilter for PersistedRetryPolicy {
    fn order(&self) -> i32 {
        RETRY_FILTER_ORDER
    }

    fn on_state_applied(&self, context: &mut ApplyStateContext, transaction: &mut dyn WriteTransaction) {
        self.index.on_state_applied(context, transaction);
    }

    fn on_state_unapplied(
        &self,
        context: &mut ApplyStateContext,
        transaction: &mut dyn WriteTransaction,
    ) {
        self.index.on_state_unapplied(context, transaction);
    }
}
