//! Retry configuration shared by every job of one policy key.
//!
//! Readers grab an immutable [`RetrySettings`] snapshot; writers build a new
//! snapshot and swap it in. A reader therefore sees either the old or the new
//! combination of fields, never a mix of both.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::backoff::{DelaySchedule, DelayStrategy};
use crate::domain::ValidationError;

/// Attempts allowed when neither the caller nor the store says otherwise.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// What to do once a job has used up its retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptsExceededAction {
    /// Leave the job in the failed state.
    #[default]
    Fail,
    /// Delete the job.
    Delete,
}

/// One immutable combination of retry settings.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    attempts: u32,
    delay: DelayStrategy,
    on_attempts_exceeded: AttemptsExceededAction,
    log_events: bool,
}

impl RetrySettings {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> &DelayStrategy {
        &self.delay
    }

    pub fn on_attempts_exceeded(&self) -> AttemptsExceededAction {
        self.on_attempts_exceeded
    }

    pub fn log_events(&self) -> bool {
        self.log_events
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DelayStrategy::polynomial(),
            on_attempts_exceeded: AttemptsExceededAction::Fail,
            log_events: true,
        }
    }
}

/// Lock-guarded cell holding the current [`RetrySettings`].
#[derive(Debug, Default)]
pub struct RetryConfiguration {
    current: RwLock<Arc<RetrySettings>>,
}

impl RetryConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current settings. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<RetrySettings> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn attempts(&self) -> u32 {
        self.snapshot().attempts
    }

    pub fn delay(&self) -> DelayStrategy {
        self.snapshot().delay.clone()
    }

    /// The explicit schedule, if one is configured instead of a function.
    pub fn delay_schedule(&self) -> Option<DelaySchedule> {
        self.snapshot().delay.schedule().cloned()
    }

    pub fn on_attempts_exceeded(&self) -> AttemptsExceededAction {
        self.snapshot().on_attempts_exceeded
    }

    pub fn log_events(&self) -> bool {
        self.snapshot().log_events
    }

    pub fn set_attempts(&self, attempts: i64) -> Result<(), ValidationError> {
        let attempts = validate_attempts(attempts)?;
        self.update(|settings| settings.attempts = attempts);
        Ok(())
    }

    /// Use an explicit schedule. Replaces any delay function.
    pub fn set_delay_schedule(&self, delays: Vec<i64>) -> Result<(), ValidationError> {
        let schedule = DelaySchedule::new(delays)?;
        self.update(|settings| settings.delay = DelayStrategy::Schedule(schedule));
        Ok(())
    }

    /// Use a delay function. Replaces any explicit schedule.
    pub fn set_delay_function<F>(&self, f: F)
    where
        F: Fn(u32) -> u64 + Send + Sync + 'static,
    {
        self.update(|settings| settings.delay = DelayStrategy::function(f));
    }

    pub fn set_delay(&self, delay: DelayStrategy) {
        self.update(|settings| settings.delay = delay);
    }

    pub fn set_on_attempts_exceeded(&self, action: AttemptsExceededAction) {
        self.update(|settings| settings.on_attempts_exceeded = action);
    }

    pub fn set_log_events(&self, enabled: bool) {
        self.update(|settings| settings.log_events = enabled);
    }

    /// Swap in attempts and (optionally) a schedule as one change.
    pub(crate) fn apply_override(&self, attempts: Option<u32>, schedule: Option<DelaySchedule>) {
        self.update(|settings| {
            if let Some(attempts) = attempts {
                settings.attempts = attempts;
            }
            if let Some(schedule) = schedule {
                settings.delay = DelayStrategy::Schedule(schedule);
            }
        });
    }

    fn update(&self, change: impl FnOnce(&mut RetrySettings)) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let mut next = RetrySettings::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
    }
}

pub(crate) fn validate_attempts(attempts: i64) -> Result<u32, ValidationError> {
    if attempts < 0 {
        return Err(ValidationError::NegativeAttempts(attempts));
    }
    u32::try_from(attempts).map_err(|_| ValidationError::TooManyAttempts(attempts))
}
