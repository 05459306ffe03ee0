//! Sled-backed storage
//!
//! Three trees: `activities` (id -> JSON record), `pending` (id -> empty)
//! and `auth_snapshots` (big-endian millis -> JSON snapshot). Big-endian
//! keys keep snapshot versions in numeric order for range lookups.

use std::path::Path;

use async_trait::async_trait;
use reserve_types::{ActivityId, ActivityRecord, AuthDataSnapshot, Timepoint};
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use tracing::{debug, warn};

use crate::{check_id, ActivityStorage, AuthVersion, StorageError, StorageResult};

const ACTIVITIES: &str = "activities";
const PENDING: &str = "pending";
const AUTH_SNAPSHOTS: &str = "auth_snapshots";

#[derive(Clone)]
pub struct SledStorage {
    db: Db,
    activities: Tree,
    pending: Tree,
    snapshots: Tree,
}

impl SledStorage {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> StorageResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        Ok(Self {
            activities: db.open_tree(ACTIVITIES)?,
            pending: db.open_tree(PENDING)?,
            snapshots: db.open_tree(AUTH_SNAPSHOTS)?,
            db,
        })
    }

    pub async fn flush(&self) -> StorageResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Writes the record and its pending-index entry in one transaction
    fn put(&self, record: &ActivityRecord) -> StorageResult<()> {
        let key = record.id.to_string();
        let value = serde_json::to_vec(record)?;
        let pending = record.is_pending();

        let outcome = (&self.activities, &self.pending).transaction(|(activities, index)| {
            activities.insert(key.as_bytes(), value.as_slice())?;
            if pending {
                index.insert(key.as_bytes(), Vec::<u8>::new())?;
            } else {
                index.remove(key.as_bytes())?;
            }
            Ok::<(), ConflictableTransactionError<()>>(())
        });
        match outcome {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => Err(StorageError::Backend(format!("write of {} aborted", key))),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<ActivityRecord>> {
        match self.activities.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn version_key(version: Timepoint) -> [u8; 8] {
    version.as_millis().to_be_bytes()
}

fn version_from_key(key: &[u8]) -> StorageResult<Timepoint> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StorageError::Backend(format!("malformed snapshot key of {} bytes", key.len())))?;
    Ok(Timepoint::from_millis(u64::from_be_bytes(bytes)))
}

#[async_trait]
impl ActivityStorage for SledStorage {
    async fn record_activity(&self, record: &ActivityRecord) -> StorageResult<()> {
        self.put(record)?;
        debug!(id = %record.id, action = %record.action, "activity recorded");
        Ok(())
    }

    async fn activity(&self, id: &ActivityId) -> StorageResult<Option<ActivityRecord>> {
        self.get(id.to_string().as_bytes())
    }

    async fn pending_activities(&self) -> StorageResult<Vec<ActivityRecord>> {
        let mut pending = Vec::new();
        for entry in self.pending.iter() {
            let (key, _) = entry?;
            match self.get(&key) {
                Ok(Some(record)) => pending.push(record),
                Ok(None) => warn!(
                    id = %String::from_utf8_lossy(&key),
                    "pending index points at missing record"
                ),
                Err(e) => warn!(
                    id = %String::from_utf8_lossy(&key),
                    error = %e,
                    "skipping undecodable pending record"
                ),
            }
        }
        // string keys do not sort numerically across digit counts
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pending)
    }

    async fn update_activity(&self, id: &ActivityId, record: &ActivityRecord) -> StorageResult<()> {
        check_id(id, record)?;
        if !self.activities.contains_key(id.to_string().as_bytes())? {
            return Err(StorageError::NotFound(id.to_string()));
        }
        self.put(record)
    }

    async fn store_auth_snapshot(
        &self,
        snapshot: &AuthDataSnapshot,
        timepoint: Timepoint,
    ) -> StorageResult<()> {
        let value = serde_json::to_vec(snapshot)?;
        self.snapshots.insert(version_key(timepoint), value)?;
        Ok(())
    }

    async fn current_auth_data_version(&self, timepoint: Timepoint) -> StorageResult<AuthVersion> {
        match self.snapshots.range(..=version_key(timepoint)).next_back() {
            Some(entry) => {
                let (key, _) = entry?;
                version_from_key(&key)
            }
            None => Err(StorageError::NoSnapshot(timepoint.as_millis())),
        }
    }

    async fn auth_data(&self, version: AuthVersion) -> StorageResult<AuthDataSnapshot> {
        match self.snapshots.get(version_key(version))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StorageError::NotFound(format!("auth snapshot {}", version))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{exercise_backend, withdraw};
    use reserve_types::{ExchangeStatus, MiningStatus};

    #[tokio::test]
    async fn sled_backend_contract() {
        let storage = SledStorage::temporary().unwrap();
        exercise_backend(&storage).await;
    }

    #[tokio::test]
    async fn undecodable_pending_record_is_skipped() {
        let storage = SledStorage::temporary().unwrap();
        let good = withdraw(5, "good");
        storage.record_activity(&good).await.unwrap();

        storage.activities.insert(b"9|bad", b"not json".to_vec()).unwrap();
        storage.pending.insert(b"9|bad", Vec::<u8>::new()).unwrap();

        let pending = storage.pending_activities().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, good.id);
    }

    #[tokio::test]
    async fn pending_order_is_numeric_not_lexical() {
        let storage = SledStorage::temporary().unwrap();
        let late = withdraw(10_000, "late");
        let early = withdraw(9_999, "early");
        storage.record_activity(&late).await.unwrap();
        storage.record_activity(&early).await.unwrap();

        let ids: Vec<_> = storage
            .pending_activities()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn settling_a_record_drops_it_from_the_index() {
        let storage = SledStorage::temporary().unwrap();
        let mut record = withdraw(7, "settles");
        storage.record_activity(&record).await.unwrap();
        let key = record.id.to_string();
        assert!(storage.pending.contains_key(key.as_bytes()).unwrap());

        record.exchange_status = ExchangeStatus::Done;
        record.mining_status = MiningStatus::Mined;
        storage.update_activity(&record.id, &record).await.unwrap();

        assert!(!storage.pending.contains_key(key.as_bytes()).unwrap());
        let stored = storage.activity(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.mining_status, MiningStatus::Mined);
        assert!(storage.pending_activities().await.unwrap().is_empty());
    }

    #[test]
    fn version_keys_round_trip() {
        let tp = Timepoint(1_700_000_000_123);
        assert_eq!(version_from_key(&version_key(tp)).unwrap(), tp);
        assert!(version_from_key(b"short").is_err());
    }
}
