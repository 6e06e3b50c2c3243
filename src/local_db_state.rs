//! Thin LMDB environment wrapper shared by the durable store, the
//! pending-write queue and the response cache.
//!
//! Each owner opens its own environment directory; inside it, named
//! databases are created lazily on first use and cached. Every write goes
//! through a single read-write transaction, and LMDB serializes writers, so
//! writes against one environment are applied in call order.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use lmdb_sys::{MDB_FIRST, MDB_LAST, MDB_NEXT};
use log::{debug, info};

use crate::app_error::{CoreError, CoreResult};

pub const DEFAULT_MAP_SIZE: usize = 10 * 1024 * 1024;
const MAX_DBS: u32 = 16;

pub type Entry = (Vec<u8>, Vec<u8>);

pub struct AppDbState {
    env: Environment,
    path: PathBuf,
    databases: Mutex<HashMap<String, Database>>,
}

impl AppDbState {
    /// Opens (creating if needed) the environment directory at `path`.
    pub fn init(path: impl AsRef<Path>, map_size: usize) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| {
            CoreError::StorageWriteFailed(format!("cannot create {}: {e}", path.display()))
        })?;

        let env = Environment::new()
            .set_max_dbs(MAX_DBS)
            .set_map_size(map_size)
            .open(&path)
            .map_err(CoreError::write)?;

        info!("LMDB environment opened at {}", path.display());
        Ok(Self {
            env,
            path,
            databases: Mutex::new(HashMap::new()),
        })
    }

    /// Idempotent: creates the named database on first call.
    pub fn database(&self, name: &str) -> CoreResult<Database> {
        let mut databases = self.databases.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(db) = databases.get(name) {
            return Ok(*db);
        }
        let db = self
            .env
            .create_db(Some(name), DatabaseFlags::empty())
            .map_err(CoreError::write)?;
        debug!("LMDB database '{name}' ready in {}", self.path.display());
        databases.insert(name.to_string(), db);
        Ok(db)
    }

    /// Inserts or replaces every entry in one transaction.
    pub fn put_many(&self, name: &str, entries: &[Entry]) -> CoreResult<()> {
        let db = self.database(name)?;
        let mut txn = self.env.begin_rw_txn().map_err(CoreError::write)?;
        for (key, value) in entries {
            txn.put(db, key, value, WriteFlags::empty())
                .map_err(CoreError::write)?;
        }
        txn.commit().map_err(CoreError::write)
    }

    pub fn get(&self, name: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let db = self.database(name)?;
        let txn = self.env.begin_ro_txn().map_err(CoreError::read)?;
        match txn.get(db, &key) {
            Ok(value) => Ok(Some(value.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(CoreError::read(e)),
        }
    }

    /// All entries in key order.
    pub fn scan(&self, name: &str) -> CoreResult<Vec<Entry>> {
        let db = self.database(name)?;
        let txn = self.env.begin_ro_txn().map_err(CoreError::read)?;
        let cursor = txn.open_ro_cursor(db).map_err(CoreError::read)?;

        let mut entries = Vec::new();
        let mut op = MDB_FIRST;
        loop {
            match cursor.get(None, None, op) {
                Ok((key, value)) => {
                    entries.push((key.unwrap_or_default().to_vec(), value.to_vec()));
                    op = MDB_NEXT;
                }
                Err(lmdb::Error::NotFound) => break,
                Err(e) => return Err(CoreError::read(e)),
            }
        }
        Ok(entries)
    }

    /// The entry with the smallest key, if any.
    pub fn first(&self, name: &str) -> CoreResult<Option<Entry>> {
        let db = self.database(name)?;
        let txn = self.env.begin_ro_txn().map_err(CoreError::read)?;
        let cursor = txn.open_ro_cursor(db).map_err(CoreError::read)?;
        match cursor.get(None, None, MDB_FIRST) {
            Ok((key, value)) => Ok(Some((key.unwrap_or_default().to_vec(), value.to_vec()))),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(CoreError::read(e)),
        }
    }

    pub fn count(&self, name: &str) -> CoreResult<usize> {
        Ok(self.scan(name)?.len())
    }

    /// Appends `value` under the next big-endian `u64` key and returns that
    /// key. Keys start at 1 and only grow while the database is non-empty.
    pub fn append(&self, name: &str, value: &[u8]) -> CoreResult<u64> {
        let db = self.database(name)?;
        let mut txn = self.env.begin_rw_txn().map_err(CoreError::write)?;
        let next = {
            let cursor = txn.open_ro_cursor(db).map_err(CoreError::write)?;
            match cursor.get(None, None, MDB_LAST) {
                Ok((Some(key), _)) => decode_seq(key)? + 1,
                Ok((None, _)) | Err(lmdb::Error::NotFound) => 1,
                Err(e) => return Err(CoreError::write(e)),
            }
        };
        txn.put(db, &next.to_be_bytes(), &value, WriteFlags::empty())
            .map_err(CoreError::write)?;
        txn.commit().map_err(CoreError::write)?;
        Ok(next)
    }

    /// Returns whether the key existed.
    pub fn delete(&self, name: &str, key: &[u8]) -> CoreResult<bool> {
        let db = self.database(name)?;
        let mut txn = self.env.begin_rw_txn().map_err(CoreError::write)?;
        match txn.del(db, &key, None) {
            Ok(()) => {
                txn.commit().map_err(CoreError::write)?;
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(CoreError::write(e)),
        }
    }

    /// Removes every entry and returns how many there were.
    pub fn clear(&self, name: &str) -> CoreResult<usize> {
        let db = self.database(name)?;
        let mut txn = self.env.begin_rw_txn().map_err(CoreError::write)?;
        let keys = {
            let cursor = txn.open_ro_cursor(db).map_err(CoreError::write)?;
            let mut keys = Vec::new();
            let mut op = MDB_FIRST;
            loop {
                match cursor.get(None, None, op) {
                    Ok((key, _)) => {
                        keys.push(key.unwrap_or_default().to_vec());
                        op = MDB_NEXT;
                    }
                    Err(lmdb::Error::NotFound) => break,
                    Err(e) => return Err(CoreError::write(e)),
                }
            }
            keys
        };
        for key in &keys {
            txn.del(db, key, None).map_err(CoreError::write)?;
        }
        txn.commit().map_err(CoreError::write)?;
        Ok(keys.len())
    }
}

pub fn decode_seq(key: &[u8]) -> CoreResult<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| CoreError::StorageReadFailed(format!("sequence key has {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
