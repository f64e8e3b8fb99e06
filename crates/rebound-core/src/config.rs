//! Runtime settings loaded from JSON.
//!
//! ```json
//! {
//!   "expiration_days": 30,
//!   "policies": [
//!     { "key": "email-job", "attempts": 3, "delays_in_seconds": [10, 60] }
//!   ]
//! }
//! ```
//!
//! Every field is optional. Values here are compiled-in defaults for the
//! policies; a persisted override still wins at construction time.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::ReboundError;
use crate::policy::{AttemptsExceededAction, ExpirationPolicy, PersistedRetryPolicy};
use crate::ports::HashStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub policies: Vec<PolicySettings>,

    /// Retention for finished jobs. Falls back to a year.
    #[serde(default)]
    pub expiration_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySettings {
    pub key: String,

    #[serde(default)]
    pub attempts: Option<i64>,

    #[serde(default)]
    pub delays_in_seconds: Option<Vec<i64>>,

    #[serde(default)]
    pub on_attempts_exceeded: AttemptsExceededAction,

    #[serde(default = "default_log_events")]
    pub log_events: bool,
}

fn default_log_events() -> bool {
    true
}

impl RuntimeSettings {
    pub fn from_json(json: &str) -> Result<Self, ReboundError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReboundError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn expiration_policy(&self) -> ExpirationPolicy {
        self.expiration_days
            .map(ExpirationPolicy::from_days)
            .unwrap_or_else(ExpirationPolicy::prolonged)
    }

    pub fn policy(&self, key: &str) -> Option<&PolicySettings> {
        self.policies.iter().find(|policy| policy.key == key)
    }
}

impl PolicySettings {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attempts: None,
            delays_in_seconds: None,
            on_attempts_exceeded: AttemptsExceededAction::default(),
            log_events: default_log_events(),
        }
    }

    /// Construct the policy, reading any override stored in `store`.
    pub fn build(&self, store: &dyn HashStore) -> Result<PersistedRetryPolicy, ReboundError> {
        let policy = PersistedRetryPolicy::new(
            self.key.as_str(),
            self.attempts,
            self.delays_in_seconds.clone(),
            store,
        )?;
        let configuration = policy.configuration();
        configuration.set_on_attempts_exceeded(self.on_attempts_exceeded);
        configuration.set_log_events(self.log_events);
        Ok(policy)
    }
}
