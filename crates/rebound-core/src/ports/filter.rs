//! Filter ports - ランタイムの状態遷移パイプラインへのフック
//!
//! The runtime calls election filters while it picks the next state of a job,
//! then apply filters inside the transaction that persists that state.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::job_parameters::{self, JobParameterStore};
use super::transaction::WriteTransaction;
use crate::domain::{JobId, JobState, StateName, StorageError};

/// Retention applied to final states when no filter overrides it.
pub const DEFAULT_JOB_EXPIRATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything an election filter can see and change.
pub struct ElectStateContext<'a> {
    pub job_id: JobId,

    /// State the job is currently in, if any.
    pub current_state: Option<StateName>,

    /// The state the runtime is about to apply. Filters may overwrite it.
    pub candidate_state: JobState,

    parameters: &'a dyn JobParameterStore,
}

impl<'a> ElectStateContext<'a> {
    pub fn new(
        job_id: JobId,
        current_state: Option<StateName>,
        candidate_state: JobState,
        parameters: &'a dyn JobParameterStore,
    ) -> Self {
        Self {
            job_id,
            current_state,
            candidate_state,
            parameters,
        }
    }

    /// Read a job parameter; absent parameters yield `T::default()`.
    pub fn get_job_parameter<T: DeserializeOwned + Default>(
        &self,
        name: &str,
    ) -> Result<T, StorageError> {
        job_parameters::read_parameter(self.parameters, self.job_id, name)
    }

    pub fn set_job_parameter<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StorageError> {
        job_parameters::write_parameter(self.parameters, self.job_id, name, value)
    }
}

/// Context of a durable apply/unapply callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyStateContext {
    pub job_id: JobId,

    /// Name of the state being replaced (rolled back), if any.
    pub old_state_name: Option<StateName>,

    pub new_state: JobState,

    /// Retention for the job once the new state is applied.
    pub job_expiration_timeout: Duration,
}

impl ApplyStateContext {
    pub fn new(job_id: JobId, old_state_name: Option<StateName>, new_state: JobState) -> Self {
        Self {
            job_id,
            old_state_name,
            new_state,
            job_expiration_timeout: DEFAULT_JOB_EXPIRATION,
        }
    }
}

/// Hook invoked during state election.
///
/// Errors from job-parameter access propagate to the runtime.
pub trait ElectStateFilter: Send + Sync {
    /// Lower runs first.
    fn order(&self) -> i32 {
        0
    }

    fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), StorageError>;
}

/// Hook invoked when a state is durably applied or rolled back.
///
/// These callbacks cannot fail the enclosing transaction.
pub trait ApplyStateFilter: Send + Sync {
    fn order(&self) -> i32 {
        0
    }

    fn on_state_applied(&self, context: &mut ApplyStateContext, transaction: &mut dyn WriteTransaction);

    fn on_state_unapplied(
        &self,
        context: &mut ApplyStateContext,
        transaction: &mut dyn WriteTransaction,
    );
}
