//! Backoff: how long to wait before retry attempt `n`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::domain::{OverrideError, ValidationError};

/// Delay function: 1-indexed attempt number → delay in seconds.
pub type DelayFn = Arc<dyn Fn(u32) -> u64 + Send + Sync>;

/// Jitter multiplier is drawn from `0..JITTER_BOUND`.
pub const JITTER_BOUND: u64 = 30;

const BASE_DELAY_SECS: u64 = 15;

/// `(attempt - 1)^4 + 15 + jitter_factor * attempt`, saturating.
///
/// Scaling the jitter by the attempt spreads out jobs that failed in the same
/// window more and more as they keep failing.
pub fn polynomial_delay(attempt: u32, jitter_factor: u64) -> u64 {
    let growth = u64::from(attempt.saturating_sub(1)).saturating_pow(4);
    growth
        .saturating_add(BASE_DELAY_SECS)
        .saturating_add(jitter_factor.saturating_mul(u64::from(attempt)))
}

/// The default delay function: polynomial growth with random jitter.
pub fn default_delay(attempt: u32) -> u64 {
    let jitter_factor = rand::thread_rng().gen_range(0..JITTER_BOUND);
    polynomial_delay(attempt, jitter_factor)
}

/// Explicit per-attempt delays, in seconds.
///
/// Never empty. Attempts past the end reuse the last value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelaySchedule(Vec<u64>);

impl DelaySchedule {
    /// Validate raw (possibly signed) delays.
    pub fn new(delays: Vec<i64>) -> Result<Self, ValidationError> {
        if delays.is_empty() {
            return Err(ValidationError::EmptyDelaySchedule);
        }
        let mut secs = Vec::with_capacity(delays.len());
        for (index, value) in delays.into_iter().enumerate() {
            let delay =
                u64::try_from(value).map_err(|_| ValidationError::NegativeDelay { index, value })?;
            secs.push(delay);
        }
        Ok(Self(secs))
    }

    pub fn from_secs(delays: Vec<u64>) -> Result<Self, ValidationError> {
        if delays.is_empty() {
            return Err(ValidationError::EmptyDelaySchedule);
        }
        Ok(Self(delays))
    }

    /// `schedule[attempt - 1]`, or the last value once attempts run past the end.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let index = (attempt.max(1) as usize - 1).min(self.0.len() - 1);
        self.0[index]
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for DelaySchedule {
    type Err = OverrideError;

    /// Parse the comma-joined form, e.g. `"1, 2, 3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let delays = s
            .split(',')
            .map(|token| {
                let token = token.trim();
                token
                    .parse::<i64>()
                    .map_err(|source| OverrideError::InvalidDelay {
                        token: token.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(delays)?)
    }
}

impl fmt::Display for DelaySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

/// Where retry delays come from. Setting one replaces the other.
#[derive(Clone)]
pub enum DelayStrategy {
    Schedule(DelaySchedule),
    Function(DelayFn),
}

impl DelayStrategy {
    /// The default: [`default_delay`].
    pub fn polynomial() -> Self {
        DelayStrategy::Function(Arc::new(default_delay))
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(u32) -> u64 + Send + Sync + 'static,
    {
        DelayStrategy::Function(Arc::new(f))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = match self {
            DelayStrategy::Schedule(schedule) => schedule.delay_for(attempt),
            DelayStrategy::Function(f) => f(attempt),
        };
        Duration::from_secs(secs)
    }

    pub fn schedule(&self) -> Option<&DelaySchedule> {
        match self {
            DelayStrategy::Schedule(schedule) => Some(schedule),
            DelayStrategy::Function(_) => None,
        }
    }
}

impl Default for DelayStrategy {
    fn default() -> Self {
        Self::polynomial()
    }
}

impl fmt::Debug for DelayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelayStrategy::Schedule(schedule) => f.debug_tuple("Schedule").field(schedule).finish(),
            DelayStrategy::Function(_) => f.write_str("Function(..)"),
        }
    }
}
