//! HashStore port - key → field/value ハッシュの保存先
//!
//! Used to persist retry overrides under `job-retry-{policy_key}`.

use std::collections::HashMap;

use crate::domain::StorageError;

/// Hash-shaped key/value storage.
pub trait HashStore: Send + Sync {
    /// All fields of the hash at `key`, or `None` when the hash does not exist.
    fn get_all_entries_from_hash(
        &self,
        key: &str,
    ) -> Result<Option<HashMap<String, String>>, StorageError>;

    /// Insert or overwrite the given fields of the hash at `key`.
    fn set_range_in_hash(
        &self,
        key: &str,
        entries: Vec<(String, String)>,
    ) -> Result<(), StorageError>;

    /// Delete the hash at `key`. Missing keys are not an error.
    fn remove_hash(&self, key: &str) -> Result<(), StorageError>;
}
