//! In-memory storage backend

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use reserve_types::{ActivityId, ActivityRecord, AuthDataSnapshot, Timepoint};

use crate::{check_id, ActivityStorage, AuthVersion, StorageError, StorageResult};

/// Process-local storage, used in tests and for dry runs
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    activities: Arc<DashMap<ActivityId, ActivityRecord>>,
    pending: Arc<DashSet<ActivityId>>,
    snapshots: Arc<RwLock<BTreeMap<AuthVersion, AuthDataSnapshot>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, record: &ActivityRecord) {
        self.activities.insert(record.id.clone(), record.clone());
        if record.is_pending() {
            self.pending.insert(record.id.clone());
        } else {
            self.pending.remove(&record.id);
        }
    }
}

#[async_trait]
impl ActivityStorage for InMemoryStorage {
    async fn record_activity(&self, record: &ActivityRecord) -> StorageResult<()> {
        self.put(record);
        Ok(())
    }

    async fn activity(&self, id: &ActivityId) -> StorageResult<Option<ActivityRecord>> {
        Ok(self.activities.get(id).map(|r| r.value().clone()))
    }

    async fn pending_activities(&self) -> StorageResult<Vec<ActivityRecord>> {
        let mut pending: Vec<ActivityRecord> = self
            .pending
            .iter()
            .filter_map(|id| self.activities.get(id.key()).map(|r| r.value().clone()))
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pending)
    }

    async fn update_activity(&self, id: &ActivityId, record: &ActivityRecord) -> StorageResult<()> {
        check_id(id, record)?;
        if !self.activities.contains_key(id) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        self.put(record);
        Ok(())
    }

    async fn store_auth_snapshot(
        &self,
        snapshot: &AuthDataSnapshot,
        timepoint: Timepoint,
    ) -> StorageResult<()> {
        self.snapshots.write().insert(timepoint, snapshot.clone());
        Ok(())
    }

    async fn current_auth_data_version(&self, timepoint: Timepoint) -> StorageResult<AuthVersion> {
        self.snapshots
            .read()
            .range(..=timepoint)
            .next_back()
            .map(|(version, _)| *version)
            .ok_or(StorageError::NoSnapshot(timepoint.as_millis()))
    }

    async fn auth_data(&self, version: AuthVersion) -> StorageResult<AuthDataSnapshot> {
        self.snapshots
            .read()
            .get(&version)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("auth snapshot {}", version)))
    }
}
