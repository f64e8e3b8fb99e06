//! Expiration filter: how long a job is kept once its state is applied.

use std::time::Duration;

use crate::ports::{ApplyStateContext, ApplyStateFilter, WriteTransaction};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Stamps a fixed retention timeout on every applied state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    timeout: Duration,
}

impl ExpirationPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_days(days: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(days) * SECS_PER_DAY))
    }

    /// Keep jobs for a year.
    pub fn prolonged() -> Self {
        Self::from_days(365)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ApplyStateFilter for ExpirationPolicy {
    fn on_state_applied(&self, context: &mut ApplyStateContext, _transaction: &mut dyn WriteTransaction) {
        context.job_expiration_timeout = self.timeout;
    }

    fn on_state_unapplied(
        &self,
        _context: &mut ApplyStateContext,
        _transaction: &mut dyn WriteTransaction,
    ) {
    }
}
