//! Reserve Storage - persistence for activity records and auth snapshots
//!
//! # Layout
//!
//! - Activity records keyed by their wire id `"<timepoint>|<eid>"`, which
//!   sorts by submission time.
//! - A pending index holding the ids of records whose `is_pending()` is true,
//!   maintained on every write.
//! - Auth snapshots keyed by the timepoint they were stored at (the
//!   "version"), so the latest snapshot as of any timepoint is a range lookup.
//!
//! Retention and pruning are handled outside this crate.

pub mod config;
pub mod error;
pub mod memory;
pub mod sled_store;

pub use config::{StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use sled_store::SledStorage;

use std::sync::Arc;

use async_trait::async_trait;
use reserve_types::{ActivityId, ActivityRecord, AuthDataSnapshot, Timepoint};
use tracing::info;

/// Snapshot versions are the timepoints they were stored at
pub type AuthVersion = Timepoint;

#[async_trait]
pub trait ActivityStorage: Send + Sync {
    /// Persist a freshly submitted record
    async fn record_activity(&self, record: &ActivityRecord) -> StorageResult<()>;

    async fn activity(&self, id: &ActivityId) -> StorageResult<Option<ActivityRecord>>;

    /// Every record still pending, oldest first
    async fn pending_activities(&self) -> StorageResult<Vec<ActivityRecord>>;

    async fn update_activity(&self, id: &ActivityId, record: &ActivityRecord) -> StorageResult<()>;

    async fn store_auth_snapshot(
        &self,
        snapshot: &AuthDataSnapshot,
        timepoint: Timepoint,
    ) -> StorageResult<()>;

    /// Newest snapshot version at or before `timepoint`
    async fn current_auth_data_version(&self, timepoint: Timepoint) -> StorageResult<AuthVersion>;

    async fn auth_data(&self, version: AuthVersion) -> StorageResult<AuthDataSnapshot>;
}

/// Open the backend selected by configuration
pub fn open(config: &StorageConfig) -> StorageResult<Arc<dyn ActivityStorage>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory activity storage");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        StorageBackend::Sled => {
            info!("Opening sled activity storage at {}", config.path.display());
            Ok(Arc::new(SledStorage::open(&config.path)?))
        }
    }
}

fn check_id(id: &ActivityId, record: &ActivityRecord) -> StorageResult<()> {
    if *id != record.id {
        return Err(StorageError::InvalidInput(format!(
            "record id {} does not match key {}",
            record.id, id
        )));
    }
    Ok(())
}
