//! Retry index: the durable set of jobs currently waiting for a retry.
//!
//! Purely for observability (dashboards, ops queries). Index writes never
//! fail the state transition they ride along with.

use tracing::warn;

use super::engine::RETRY_REASON_PREFIX;
use crate::domain::{JobState, StateName};
use crate::ports::{ApplyStateContext, WriteTransaction};

/// Name of the set holding retrying job ids.
pub const RETRIES_SET: &str = "retries";

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryIndexWriter;

impl RetryIndexWriter {
    pub fn new() -> Self {
        Self
    }

    /// Index the job when a retry was scheduled.
    pub fn on_state_applied(&self, context: &ApplyStateContext, transaction: &mut dyn WriteTransaction) {
        let JobState::Scheduled {
            reason: Some(reason),
            ..
        } = &context.new_state
        else {
            return;
        };
        if !reason.starts_with(RETRY_REASON_PREFIX) {
            return;
        }

        let job_id = context.job_id.to_string();
        if let Err(error) = transaction.add_to_set(RETRIES_SET, &job_id) {
            warn!(job_id = %context.job_id, %error, "failed to add job to the retry index");
        }
    }

    /// Drop the job from the index when its scheduled state is replaced.
    pub fn on_state_unapplied(
        &self,
        context: &ApplyStateContext,
        transaction: &mut dyn WriteTransaction,
    ) {
        if context.old_state_name != Some(StateName::Scheduled) {
            return;
        }

        let job_id = context.job_id.to_string();
        if let Err(error) = transaction.remove_from_set(RETRIES_SET, &job_id) {
            warn!(job_id = %context.job_id, %error, "failed to remove job from the retry index");
        }
    }
}
