//! Cached HTTP responses, keyed by URL
//!
//! Lives in its own redb file so wiping or corrupting the response cache
//! can never touch orders, carts, or sessions. A format version stamped in
//! the meta table discards every cached response when the stored shape
//! changes, instead of trying to migrate throwaway data.

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::store::{StoreResult, decode_lenient};

/// Cached responses: key = URL, value = JSON-serialized CachedResponse
const RESPONSE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("response_cache");

/// Cache bookkeeping: key = well-known string, value = JSON
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_meta");

const VERSION_KEY: &str = "cache_version";

/// Bump to discard all cached responses on the next open
pub const CACHE_VERSION: u32 = 1;

/// One stored response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// When this copy was stored, unix millis
    pub stored_at: i64,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Response cache backed by its own redb database
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Database>,
}

impl CacheStore {
    /// Open or create the cache at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::open_at_version(db, CACHE_VERSION)
    }

    /// Open a cache on an in-memory backend (tests, ephemeral runs)
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::open_at_version(db, CACHE_VERSION)
    }

    /// Create tables, discarding stored responses when the version moved
    fn open_at_version(db: Database, version: u32) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let stored: Option<u32> = {
                let meta = write_txn.open_table(META_TABLE)?;
                match meta.get(VERSION_KEY)? {
                    Some(guard) => serde_json::from_slice(guard.value()).ok(),
                    None => None,
                }
            };

            if stored != Some(version) {
                if stored.is_some() {
                    tracing::info!(
                        ?stored,
                        version,
                        "Cache format changed; discarding cached responses"
                    );
                }
                write_txn.delete_table(RESPONSE_TABLE)?;
            }
            let _ = write_txn.open_table(RESPONSE_TABLE)?;

            let stamp = serde_json::to_vec(&version)?;
            let mut meta = write_txn.open_table(META_TABLE)?;
            meta.insert(VERSION_KEY, stamp.as_slice())?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Cached copy for a URL, unreadable entries reported as a miss
    pub fn get(&self, url: &str) -> StoreResult<Option<CachedResponse>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESPONSE_TABLE)?;
        match table.get(url)? {
            Some(guard) => Ok(decode_lenient("response_cache", url, guard.value())),
            None => Ok(None),
        }
    }

    /// Store or overwrite the copy for a URL
    pub fn put(&self, url: &str, response: &CachedResponse) -> StoreResult<()> {
        let value = serde_json::to_vec(response)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RESPONSE_TABLE)?;
            table.insert(url, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Number of cached responses
    pub fn len(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESPONSE_TABLE)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, url: &str, bytes: &[u8]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RESPONSE_TABLE)?;
            table.insert(url, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
