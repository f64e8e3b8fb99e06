//! Persisted retry overrides.
//!
//! Operators can change attempts and delays of a policy without a redeploy by
//! writing a hash under `job-retry-{policy_key}`:
//!
//! | field            | value                         |
//! |------------------|-------------------------------|
//! | `RetryAttempts`  | decimal integer               |
//! | `DelayInSeconds` | comma-joined integers or empty |
//!
//! The override is read once, when the policy is constructed.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::backoff::DelaySchedule;
use super::configuration::{RetryConfiguration, validate_attempts};
use crate::domain::{OverrideError, PolicyKey, ReboundError, StorageError};
use crate::ports::HashStore;

pub const HASH_KEY_PREFIX: &str = "job-retry-";
pub const ATTEMPTS_FIELD: &str = "RetryAttempts";
pub const DELAYS_FIELD: &str = "DelayInSeconds";

pub fn hash_key(policy_key: &PolicyKey) -> String {
    format!("{HASH_KEY_PREFIX}{policy_key}")
}

/// A parsed override record. Blank fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedOverride {
    pub attempts: Option<u32>,
    pub delay_schedule: Option<DelaySchedule>,
}

impl PersistedOverride {
    /// Parse the raw hash. Any bad field rejects the whole record.
    pub fn parse(entries: &HashMap<String, String>) -> Result<Self, OverrideError> {
        let attempts = match non_blank(entries, ATTEMPTS_FIELD) {
            None => None,
            Some(raw) => {
                let value = raw
                    .parse::<i64>()
                    .map_err(|source| OverrideError::InvalidAttempts {
                        value: raw.to_string(),
                        source,
                    })?;
                Some(validate_attempts(value)?)
            }
        };

        let delay_schedule = non_blank(entries, DELAYS_FIELD)
            .map(str::parse::<DelaySchedule>)
            .transpose()?;

        Ok(Self {
            attempts,
            delay_schedule,
        })
    }

    pub fn to_entries(&self) -> Vec<(String, String)> {
        vec![
            (
                ATTEMPTS_FIELD.to_string(),
                self.attempts.map(|a| a.to_string()).unwrap_or_default(),
            ),
            (
                DELAYS_FIELD.to_string(),
                self.delay_schedule
                    .as_ref()
                    .map(DelaySchedule::to_string)
                    .unwrap_or_default(),
            ),
        ]
    }
}

fn non_blank<'a>(entries: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    entries
        .get(field)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Read and parse the override of `policy_key`, if one is stored.
pub fn load_override(
    store: &dyn HashStore,
    policy_key: &PolicyKey,
) -> Result<Option<PersistedOverride>, ReboundError> {
    let key = hash_key(policy_key);
    let Some(entries) = store.get_all_entries_from_hash(&key)? else {
        return Ok(None);
    };
    Ok(Some(PersistedOverride::parse(&entries)?))
}

/// Apply the stored override of `policy_key` onto `config`.
///
/// A missing record keeps the defaults and a malformed one is logged and
/// ignored. Storage failures propagate. Returns whether an override was applied.
pub fn apply_persisted_override(
    store: &dyn HashStore,
    policy_key: &PolicyKey,
    config: &RetryConfiguration,
) -> Result<bool, StorageError> {
    let Some(entries) = store.get_all_entries_from_hash(&hash_key(policy_key))? else {
        debug!(policy_key = %policy_key, "no retry configuration saved in store");
        return Ok(false);
    };

    match PersistedOverride::parse(&entries) {
        Ok(found) => {
            config.apply_override(found.attempts, found.delay_schedule.clone());
            debug!(
                policy_key = %policy_key,
                attempts = ?found.attempts,
                delays = ?found.delay_schedule.as_ref().map(DelaySchedule::as_slice),
                "loaded retry configuration from store"
            );
            Ok(true)
        }
        Err(error) => {
            warn!(policy_key = %policy_key, %error, "ignoring malformed retry configuration");
            Ok(false)
        }
    }
}

/// Store an override for `policy_key`. Values are validated first.
///
/// Without `delays` the delay field is written blank, so the policy falls
/// back to its compiled-in delay strategy.
pub fn save_override(
    store: &dyn HashStore,
    policy_key: &PolicyKey,
    attempts: i64,
    delays: Option<Vec<i64>>,
) -> Result<(), ReboundError> {
    let record = PersistedOverride {
        attempts: Some(validate_attempts(attempts)?),
        delay_schedule: delays.map(DelaySchedule::new).transpose()?,
    };
    store.set_range_in_hash(&hash_key(policy_key), record.to_entries())?;
    Ok(())
}

pub fn clear_override(store: &dyn HashStore, policy_key: &PolicyKey) -> Result<(), StorageError> {
    store.remove_hash(&hash_key(policy_key))
}


/// Hash store whose backend is down.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
impl HashStore for UnavailableStore {
    fn get_all_entries_from_hash(
        &self,
        _key: &str,
    ) -> Result<Option<HashMap<String, String>>, StorageError> {
        Err(StorageError::Unavailable("redis down".into()))
    }

    fn set_range_in_hash(&self, _key: &str, _entries: Vec<(String, String)>) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("redis down".into()))
    }

    fn remove_hash(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("redis down".into()))
    }
}
