//! JobStorage port - 状態遷移パイプラインが必要とするストレージ全体
//!
//! Bundles the narrower ports with the two things only the pipeline needs:
//! the current state of a job and a fresh write transaction.

use super::hash_store::HashStore;
use super::job_parameters::JobParameterStore;
use super::transaction::WriteTransaction;
use crate::domain::{JobId, JobState, StorageError};

pub trait JobStorage: HashStore + JobParameterStore {
    /// `None` when the job does not exist.
    fn current_state(&self, job_id: JobId) -> Result<Option<JobState>, StorageError>;

    fn begin_transaction(&self) -> Box<dyn WriteTransaction>;
}
