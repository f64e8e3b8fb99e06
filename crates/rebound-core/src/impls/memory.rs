//! InMemoryStorage - 開発用・テスト用のジョブストレージ
//!
//! # 学習ポイント
//! - 1 つの Mutex で hash / set / job をまとめて保護
//! - トランザクションはコマンドをバッファし、commit で一括適用
//! - 時刻は Clock port 経由（テストでは FixedClock）

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{JobId, JobState, StorageError};
use crate::ports::{Clock, HashStore, JobParameterStore, JobStorage, SystemClock, WriteTransaction};

/// A job as the in-memory runtime stores it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Every state the job has been in, oldest first.
    pub history: Vec<JobState>,
    pub created_at: DateTime<Utc>,
    /// When a scheduled job becomes due.
    pub enqueue_at: Option<DateTime<Utc>>,
    pub expire_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StorageState {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    jobs: HashMap<JobId, JobRecord>,
    parameters: HashMap<JobId, HashMap<String, String>>,
}

/// InMemoryStorage は開発用のストレージ
///
/// Clones share the same underlying state.
#[derive(Clone)]
pub struct InMemoryStorage {
    state: Arc<Mutex<StorageState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StorageState::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a job in the `Enqueued` state.
    pub fn create_job(&self, job_type: impl Into<String>, payload: serde_json::Value) -> JobId {
        let job_id = JobId::generate();
        let state = JobState::Enqueued { reason: None };
        let record = JobRecord {
            job_id,
            job_type: job_type.into(),
            payload,
            history: vec![state.clone()],
            state,
            created_at: self.clock.now(),
            enqueue_at: None,
            expire_at: None,
        };
        self.lock().jobs.insert(job_id, record);
        job_id
    }

    pub fn job(&self, job_id: JobId) -> Option<JobRecord> {
        self.lock().jobs.get(&job_id).cloned()
    }

    /// Enqueued jobs, oldest first.
    pub fn enqueued_jobs(&self) -> Vec<JobId> {
        let state = self.lock();
        let mut jobs: Vec<&JobRecord> = state
            .jobs
            .values()
            .filter(|job| matches!(job.state, JobState::Enqueued { .. }))
            .collect();
        jobs.sort_by_key(|job| job.job_id.as_ulid());
        jobs.into_iter().map(|job| job.job_id).collect()
    }

    /// Scheduled jobs whose delay has elapsed.
    pub fn due_scheduled_jobs(&self) -> Vec<JobId> {
        self.due_where(|_| true)
    }

    /// Due scheduled jobs of one job type.
    pub fn due_scheduled_jobs_of(&self, job_type: &str) -> Vec<JobId> {
        self.due_where(|job| job.job_type == job_type)
    }

    fn due_where(&self, keep: impl Fn(&JobRecord) -> bool) -> Vec<JobId> {
        let now = self.clock.now();
        let state = self.lock();
        let mut due: Vec<(DateTime<Utc>, JobId)> = state
            .jobs
            .values()
            .filter(|job| keep(job))
            .filter_map(|job| match (&job.state, job.enqueue_at) {
                (JobState::Scheduled { .. }, Some(at)) if at <= now => Some((at, job.job_id)),
                _ => None,
            })
            .collect();
        due.sort_by_key(|(at, job_id)| (*at, job_id.as_ulid()));
        due.into_iter().map(|(_, job_id)| job_id).collect()
    }

    /// Jobs still waiting to run or to be retried.
    pub fn has_pending_jobs(&self) -> bool {
        self.lock().jobs.values().any(|job| {
            matches!(
                job.state,
                JobState::Enqueued { .. } | JobState::Scheduled { .. } | JobState::Processing
            )
        })
    }

    /// Earliest due time among scheduled jobs.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .jobs
            .values()
            .filter(|job| matches!(job.state, JobState::Scheduled { .. }))
            .filter_map(|job| job.enqueue_at)
            .min()
    }

    pub fn set_members(&self, set: &str) -> Vec<String> {
        self.lock()
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_contains(&self, set: &str, value: &str) -> bool {
        self.lock()
            .sets
            .get(set)
            .is_some_and(|members| members.contains(value))
    }

    /// Drop jobs whose expiration has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.expire_at.is_some_and(|at| at <= now))
            .map(|job| job.job_id)
            .collect();
        for job_id in &expired {
            state.jobs.remove(job_id);
            state.parameters.remove(job_id);
        }
        expired.len()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage").finish_non_exhaustive()
    }
}

impl HashStore for InMemoryStorage {
    fn get_all_entries_from_hash(
        &self,
        key: &str,
    ) -> Result<Option<HashMap<String, String>>, StorageError> {
        Ok(self.lock().hashes.get(key).cloned())
    }

    fn set_range_in_hash(&self, key: &str, entries: Vec<(String, String)>) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.hashes.entry(key.to_string()).or_default().extend(entries);
        Ok(())
    }

    fn remove_hash(&self, key: &str) -> Result<(), StorageError> {
        self.lock().hashes.remove(key);
        Ok(())
    }
}

impl JobParameterStore for InMemoryStorage {
    fn get_job_parameter(&self, job_id: JobId, name: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .lock()
            .parameters
            .get(&job_id)
            .and_then(|parameters| parameters.get(name))
            .cloned())
    }

    fn set_job_parameter(&self, job_id: JobId, name: &str, value: String) -> Result<(), StorageError> {
        self.lock()
            .parameters
            .entry(job_id)
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }
}

impl JobStorage for InMemoryStorage {
    fn current_state(&self, job_id: JobId) -> Result<Option<JobState>, StorageError> {
        Ok(self.lock().jobs.get(&job_id).map(|job| job.state.clone()))
    }

    fn begin_transaction(&self) -> Box<dyn WriteTransaction> {
        Box::new(InMemoryTransaction {
            storage: self.clone(),
            commands: Vec::new(),
        })
    }
}

#[derive(Debug)]
enum Command {
    SetJobState(JobId, JobState),
    AddToSet(String, String),
    RemoveFromSet(String, String),
    ExpireJob(JobId, Duration),
    PersistJob(JobId),
}

impl Command {
    fn job_id(&self) -> Option<JobId> {
        match self {
            Command::SetJobState(job_id, _) | Command::ExpireJob(job_id, _) | Command::PersistJob(job_id) => {
                Some(*job_id)
            }
            _ => None,
        }
    }
}

/// Buffers writes until `commit`. Dropping it discards them.
struct InMemoryTransaction {
    storage: InMemoryStorage,
    commands: Vec<Command>,
}

impl WriteTransaction for InMemoryTransaction {
    fn set_job_state(&mut self, job_id: JobId, state: JobState) -> Result<(), StorageError> {
        self.commands.push(Command::SetJobState(job_id, state));
        Ok(())
    }

    fn add_to_set(&mut self, set: &str, value: &str) -> Result<(), StorageError> {
        self.commands.push(Command::AddToSet(set.into(), value.into()));
        Ok(())
    }

    fn remove_from_set(&mut self, set: &str, value: &str) -> Result<(), StorageError> {
        self.commands.push(Command::RemoveFromSet(set.into(), value.into()));
        Ok(())
    }

    fn expire_job(&mut self, job_id: JobId, timeout: Duration) -> Result<(), StorageError> {
        self.commands.push(Command::ExpireJob(job_id, timeout));
        Ok(())
    }

    fn persist_job(&mut self, job_id: JobId) -> Result<(), StorageError> {
        self.commands.push(Command::PersistJob(job_id));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let now = self.storage.clock.now();
        let mut state = self.storage.lock();

        // 全コマンドを検証してから適用（部分適用しない）
        if let Some(missing) = self
            .commands
            .iter()
            .filter_map(Command::job_id)
            .find(|job_id| !state.jobs.contains_key(job_id))
        {
            return Err(StorageError::JobNotFound(missing));
        }

        for command in self.commands {
            match command {
                Command::SetJobState(job_id, new_state) => {
                    if let Some(job) = state.jobs.get_mut(&job_id) {
                        job.enqueue_at = match &new_state {
                            JobState::Scheduled { delay, .. } => offset(now, *delay),
                            _ => None,
                        };
                        job.history.push(new_state.clone());
                        job.state = new_state;
                    }
                }
                Command::AddToSet(set, value) => {
                    state.sets.entry(set).or_default().insert(value);
                }
                Command::RemoveFromSet(set, value) => {
                    if let Some(members) = state.sets.get_mut(&set) {
                        members.remove(&value);
                    }
                }
                Command::ExpireJob(job_id, timeout) => {
                    if let Some(job) = state.jobs.get_mut(&job_id) {
                        job.expire_at = offset(now, timeout);
                    }
                }
                Command::PersistJob(job_id) => {
                    if let Some(job) = state.jobs.get_mut(&job_id) {
                        job.expire_at = None;
                    }
                }
            }
        }
        Ok(())
    }
}

/// `None` when the result does not fit in a timestamp.
fn offset(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}
