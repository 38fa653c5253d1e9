use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::models::{JobId, JobOutcome, JobRecord};
use crate::errors::JobError;

/// Storage for job status records.
///
/// Implementations must replace status and outcome together so a reader
/// never sees one without the other.
pub trait JobStore: Send + Sync {
    /// Register `id` as running.
    fn create(&self, id: JobId) -> Result<(), JobError>;

    fn get(&self, id: &JobId) -> Option<JobRecord>;

    /// Move a running record to its terminal state. Returns `false` when the
    /// record is unknown or already terminal; the stored outcome is untouched.
    fn complete(&self, id: &JobId, outcome: JobOutcome) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal records older than the retention window.
    fn evict_expired(&self) -> usize;
}

/// In-process store with a fixed capacity and time-based eviction of
/// finished jobs. Running jobs are never evicted.
pub struct MemoryJobStore {
    records: Mutex<HashMap<JobId, JobRecord>>,
    capacity: usize,
    retention: Duration,
}

impl MemoryJobStore {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            capacity,
            retention,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A panic while holding the lock cannot leave a record half-written:
    // every mutation is a single insert/remove of a complete value.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, record: &JobRecord, now: DateTime<Utc>) -> bool {
        match record.completed_at {
            Some(done) => (now - done)
                .to_std()
                .map(|age| age >= self.retention)
                .unwrap_or(false),
            None => false,
        }
    }

    fn evict_expired_locked(&self, records: &mut HashMap<JobId, JobRecord>) -> usize {
        let now = Utc::now();
        let before = records.len();
        records.retain(|_, r| !self.is_expired(r, now));
        before - records.len()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, id: JobId) -> Result<(), JobError> {
        let mut records = self.lock();
        if records.len() >= self.capacity {
            self.evict_expired_locked(&mut records);
        }
        if records.len() >= self.capacity {
            let oldest_terminal = records
                .values()
                .filter_map(|r| r.completed_at.map(|done| (done, r.id)))
                .min_by_key(|(done, _)| *done)
                .map(|(_, id)| id);
            match oldest_terminal {
                Some(victim) => {
                    records.remove(&victim);
                    tracing::debug!(job_id = %victim, "Evicted oldest finished job to make room");
                }
                None => {
                    return Err(JobError::StoreFull {
                        capacity: self.capacity,
                    });
                }
            }
        }
        records.insert(id, JobRecord::running(id));
        Ok(())
    }

    fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.lock().get(id).cloned()
    }

    fn complete(&self, id: &JobId, outcome: JobOutcome) -> bool {
        let mut records = self.lock();
        let Some(record) = records.get_mut(id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.status = outcome.status();
        record.outcome = Some(outcome);
        record.completed_at = Some(Utc::now());
        true
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn evict_expired(&self) -> usize {
        let mut records = self.lock();
        self.evict_expired_locked(&mut records)
    }
}

/// Periodically evict expired records until `cancel` fires.
pub fn spawn_sweeper(
    store: Arc<dyn JobStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = store.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = store.len(), "Swept expired jobs");
                    }
                }
            }
        }
    })
}
