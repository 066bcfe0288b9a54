use std::{collections::VecDeque, sync::Arc, time::SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use postie_common::EmailTask;

use crate::{Attachment, Result, StoreError, TaskId, TaskRecord, TaskStatus, TaskStore};

/// In-memory task store
///
/// Records live in a `DashMap`, so concurrent dispatch units can create and
/// update records without a global lock. Nothing survives a restart.
///
/// Memory use can be bounded two ways:
///
/// - a hard capacity, past which writes fail with
///   [`StoreError::CapacityExceeded`], which the consumer treats like any
///   other transient store failure;
/// - a retention limit, past which the records that finished earliest are
///   evicted. Pending records are never evicted, so the store can still grow
///   past the limit while that many attempts are in flight.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaskStore {
    records: Arc<DashMap<TaskId, TaskRecord>>,
    capacity: Option<usize>,
    retention: Option<usize>,
    /// Finished record ids, oldest first.
    finished: Arc<Mutex<VecDeque<TaskId>>>,
}

impl MemoryTaskStore {
    /// Create an empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store holding at most `capacity` records
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(DashMap::with_capacity(capacity)),
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Create an empty store that keeps at most `max_records` records by
    /// evicting the oldest `sent` and `failed` ones.
    #[must_use]
    pub fn with_retention(max_records: usize) -> Self {
        Self {
            retention: Some(max_records),
            ..Self::default()
        }
    }

    /// Drop finished records, oldest first, until the store is back within
    /// its retention limit.
    fn evict(&self) {
        let Some(max_records) = self.retention else {
            return;
        };

        let mut finished = self.finished.lock();
        let mut evicted = 0_usize;
        while self.records.len() > max_records {
            let Some(id) = finished.pop_front() else {
                break;
            };
            if self
                .records
                .remove_if(&id, |_, record| record.status.is_terminal())
                .is_some()
            {
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::trace!(
                evicted,
                remaining = self.records.len(),
                "Evicted finished task records"
            );
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record with the given status name.
    #[must_use]
    pub fn with_status(&self, status: &str) -> Vec<TaskRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|entry| entry.status.as_str() == status)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, task: &EmailTask, attachments: Vec<Attachment>) -> Result<TaskId> {
        if let Some(capacity) = self.capacity.filter(|&cap| self.records.len() >= cap) {
            return Err(StoreError::CapacityExceeded { capacity });
        }

        let record = TaskRecord::pending(task, attachments);
        let id = record.id;
        self.records.insert(id, record);
        self.evict();

        tracing::trace!(%id, "Task record created");
        Ok(id)
    }

    async fn update_status(&self, id: &TaskId, status: TaskStatus) -> Result<()> {
        let finishing = {
            let mut record = self.records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
            let finishing = !record.status.is_terminal() && status.is_terminal();
            record.status = status;
            record.updated_at = SystemTime::now();

            tracing::trace!(%id, status = record.status.as_str(), "Task record updated");
            finishing
        };

        // The shard guard must be released before evicting.
        if finishing {
            self.finished.lock().push_back(*id);
            self.evict();
        }
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<TaskRecord> {
        self.records
            .get(id)
            .map(|record| record.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn list(&self) -> Result<Vec<TaskId>> {
        let mut ids: Vec<_> = self.records.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        Ok(ids)
    }
}
