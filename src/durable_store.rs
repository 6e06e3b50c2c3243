//! Per-collection snapshot cache.
//!
//! [`StorageCapability`] is the platform seam: [`LmdbCollections`] when a
//! data directory is usable, [`Unavailable`] otherwise. [`DurableStore`]
//! sits on top and speaks typed records; it never fails a read (errors are
//! logged and yield an empty snapshot) and only reports write failures so the
//! caller can log them.
//!
//! A collection can hold optimistic records written before the backend's
//! set was ever fetched. Such a snapshot is partial: only a full network
//! fetch marks a collection complete, and clearing it drops the mark.

use std::path::Path;
use std::sync::Arc;

use log::warn;

use crate::app_error::{CoreError, CoreResult};
use crate::local_db_model::{Collection, Record};
use crate::local_db_state::{AppDbState, Entry};

pub trait StorageCapability: Send + Sync {
    /// False for the no-op implementation.
    fn is_persistent(&self) -> bool;

    /// Stored values of the collection in key order.
    fn scan(&self, collection: Collection) -> CoreResult<Vec<Vec<u8>>>;

    /// Insert-or-replace by key. Keys absent from `entries` are untouched.
    fn upsert(&self, collection: Collection, entries: &[Entry]) -> CoreResult<()>;

    /// Returns how many entries were removed. Also drops the completeness mark.
    fn clear(&self, collection: Collection) -> CoreResult<usize>;

    /// Whether the stored entries include a full network snapshot.
    fn is_complete(&self, collection: Collection) -> CoreResult<bool>;

    fn mark_complete(&self, collection: Collection) -> CoreResult<()>;
}

/// Holds one entry per complete collection: name to completion time (ms).
const SNAPSHOTS_DB: &str = "snapshots";

/// Collections stored as named databases of one LMDB environment.
pub struct LmdbCollections {
    state: AppDbState,
}

impl LmdbCollections {
    pub fn open(dir: impl AsRef<Path>, map_size: usize) -> CoreResult<Self> {
        let state = AppDbState::init(dir.as_ref().join("collections.lmdb"), map_size)?;
        for collection in Collection::ALL {
            state.database(collection.as_str())?;
        }
        state.database(SNAPSHOTS_DB)?;
        Ok(Self { state })
    }
}

impl StorageCapability for LmdbCollections {
    fn is_persistent(&self) -> bool {
        true
    }

    fn scan(&self, collection: Collection) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self
            .state
            .scan(collection.as_str())?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    fn upsert(&self, collection: Collection, entries: &[Entry]) -> CoreResult<()> {
        self.state.put_many(collection.as_str(), entries)
    }

    fn clear(&self, collection: Collection) -> CoreResult<usize> {
        self.state.delete(SNAPSHOTS_DB, collection.as_str().as_bytes())?;
        self.state.clear(collection.as_str())
    }

    fn is_complete(&self, collection: Collection) -> CoreResult<bool> {
        Ok(self
            .state
            .get(SNAPSHOTS_DB, collection.as_str().as_bytes())?
            .is_some())
    }

    fn mark_complete(&self, collection: Collection) -> CoreResult<()> {
        let stamp = chrono::Utc::now().timestamp_millis().to_be_bytes().to_vec();
        self.state
            .put_many(SNAPSHOTS_DB, &[(collection.as_str().as_bytes().to_vec(), stamp)])
    }
}

/// Stand-in for platforms without persistent storage. Reads are empty and
/// writes are dropped, so callers behave as network-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl StorageCapability for Unavailable {
    fn is_persistent(&self) -> bool {
        false
    }

    fn scan(&self, _collection: Collection) -> CoreResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    fn upsert(&self, _collection: Collection, _entries: &[Entry]) -> CoreResult<()> {
        Err(CoreError::StorageUnavailable)
    }

    fn clear(&self, _collection: Collection) -> CoreResult<usize> {
        Ok(0)
    }

    fn is_complete(&self, _collection: Collection) -> CoreResult<bool> {
        Ok(false)
    }

    fn mark_complete(&self, _collection: Collection) -> CoreResult<()> {
        Err(CoreError::StorageUnavailable)
    }
}

#[derive(Clone)]
pub struct DurableStore {
    capability: Arc<dyn StorageCapability>,
}

impl DurableStore {
    pub fn new(capability: Arc<dyn StorageCapability>) -> Self {
        Self { capability }
    }

    /// Probes `dir` for persistence. Any failure, or no directory at all,
    /// degrades to [`Unavailable`].
    pub fn open(dir: Option<&Path>, map_size: usize) -> Self {
        let Some(dir) = dir else {
            return Self::unavailable();
        };
        match LmdbCollections::open(dir, map_size) {
            Ok(collections) => Self::new(Arc::new(collections)),
            Err(e) => {
                warn!("Durable store unavailable, running network-only: {e}");
                Self::unavailable()
            }
        }
    }

    pub fn unavailable() -> Self {
        Self::new(Arc::new(Unavailable))
    }

    pub fn is_persistent(&self) -> bool {
        self.capability.is_persistent()
    }

    /// Every stored record of `R`'s collection, or empty on any error.
    /// Undecodable entries are skipped.
    pub fn get_all<R: Record>(&self) -> Vec<R> {
        let collection = R::COLLECTION;
        let values = match self.capability.scan(collection) {
            Ok(values) => values,
            Err(e) => {
                warn!("Could not read {collection} from durable store: {e}");
                return Vec::new();
            }
        };

        values
            .iter()
            .filter_map(|bytes| match serde_json::from_slice::<R>(bytes) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping undecodable {collection} entry: {e}");
                    None
                }
            })
            .collect()
    }

    /// Upserts by store key. Records without a key are skipped.
    pub fn put_all<R: Record>(&self, records: &[R]) -> CoreResult<()> {
        let collection = R::COLLECTION;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let Some(key) = record.store_key() else {
                warn!("Not storing {collection} record without id or local key");
                continue;
            };
            entries.push((key.into_bytes(), serde_json::to_vec(record)?));
        }
        if entries.is_empty() {
            return Ok(());
        }
        self.capability.upsert(collection, &entries)
    }

    pub fn clear(&self, collection: Collection) -> CoreResult<usize> {
        self.capability.clear(collection)
    }

    /// False on read errors, so the caller goes back to the network.
    pub fn is_complete(&self, collection: Collection) -> bool {
        self.capability.is_complete(collection).unwrap_or_else(|e| {
            warn!("Could not read {collection} snapshot state: {e}");
            false
        })
    }

    pub fn mark_complete(&self, collection: Collection) -> CoreResult<()> {
        self.capability.mark_complete(collection)
    }
}
