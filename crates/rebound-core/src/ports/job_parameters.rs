//! JobParameterStore port - ジョブ単位のパラメータ
//!
//! Values are JSON strings, so typed reads/writes go through serde.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{JobId, StorageError};

/// Named, job-scoped parameters owned by the runtime.
pub trait JobParameterStore: Send + Sync {
    fn get_job_parameter(&self, job_id: JobId, name: &str) -> Result<Option<String>, StorageError>;

    fn set_job_parameter(&self, job_id: JobId, name: &str, value: String)
    -> Result<(), StorageError>;
}

/// Read a JSON-encoded parameter. Absent parameters decode to `T::default()`.
pub fn read_parameter<T>(
    store: &dyn JobParameterStore,
    job_id: JobId,
    name: &str,
) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    match store.get_job_parameter(job_id, name)? {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_str(&raw).map_err(|source| StorageError::Parameter {
            job_id,
            name: name.to_string(),
            source,
        }),
    }
}

/// Write a parameter as JSON.
pub fn write_parameter<T: Serialize>(
    store: &dyn JobParameterStore,
    job_id: JobId,
    name: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|source| StorageError::Parameter {
        job_id,
        name: name.to_string(),
        source,
    })?;
    store.set_job_parameter(job_id, name, raw)
}
