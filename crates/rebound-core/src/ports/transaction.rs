//! WriteTransaction port - 状態遷移と同一トランザクションで行う書き込み
//!
//! Writes are buffered and take effect together on `commit`.

use std::time::Duration;

use crate::domain::{JobId, JobState, StorageError};

pub trait WriteTransaction {
    /// Record `state` as the job's current state.
    fn set_job_state(&mut self, job_id: JobId, state: JobState) -> Result<(), StorageError>;

    fn add_to_set(&mut self, set: &str, value: &str) -> Result<(), StorageError>;

    fn remove_from_set(&mut self, set: &str, value: &str) -> Result<(), StorageError>;

    /// Make the job eligible for removal after `timeout`.
    fn expire_job(&mut self, job_id: JobId, timeout: Duration) -> Result<(), StorageError>;

    /// Clear any expiration set on the job.
    fn persist_job(&mut self, job_id: JobId) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
