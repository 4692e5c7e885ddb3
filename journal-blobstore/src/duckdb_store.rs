use chrono::Utc;
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{BlobLocator, BlobStore, BlobStoreError, BlobStoreResult, content_hash};

/// Blobs kept in a DuckDB `blobs` table, for deployments without a
/// writable blob directory.
pub struct DuckDbBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbBlobStore {
    pub fn open(db_path: &Path) -> BlobStoreResult<Self> {
        let conn = Connection::open(db_path)?;
        // DuckDB otherwise claims ~80% of RAM per connection
        conn.execute_batch("PRAGMA memory_limit='128MB'; PRAGMA threads=1;")?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Open with an existing shared connection.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> BlobStoreResult<Self> {
        let store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> BlobStoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    fn ensure_tables(&self) -> BlobStoreResult<()> {
        let conn = self.conn.lock().map_err(|e| BlobStoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS blobs (
                blob_id VARCHAR PRIMARY KEY,
                data BLOB NOT NULL,
                size BIGINT NOT NULL DEFAULT 0,
                content_hash VARCHAR NOT NULL,
                created_at BIGINT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl BlobStore for DuckDbBlobStore {
    fn put(&self, data: &[u8]) -> BlobStoreResult<BlobLocator> {
        let locator = BlobLocator::generate();
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().map_err(|e| BlobStoreError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO blobs (blob_id, data, size, content_hash, created_at) VALUES (?, ?, ?, ?, ?)",
            params![locator.as_str(), data, data.len() as i64, content_hash(data), now],
        )?;
        Ok(locator)
    }

    /// Reads a blob and checks it against the hash recorded at write time.
    fn get(&self, locator: &BlobLocator) -> BlobStoreResult<Vec<u8>> {
        let conn = self.conn.lock().map_err(|e| BlobStoreError::Storage(e.to_string()))?;
        let result: Result<(Vec<u8>, String), _> = conn.query_row(
            "SELECT data, content_hash FROM blobs WHERE blob_id = ?",
            params![locator.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        let (data, expected) = match result {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => {
                return Err(BlobStoreError::NotFound(locator.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        if content_hash(&data) != expected {
            return Err(BlobStoreError::Corrupt(locator.to_string()));
        }
        Ok(data)
    }

    fn delete(&self, locator: &BlobLocator) -> BlobStoreResult<()> {
        let conn = self.conn.lock().map_err(|e| BlobStoreError::Storage(e.to_string()))?;
        let affected =
            conn.execute("DELETE FROM blobs WHERE blob_id = ?", params![locator.as_str()])?;
        if affected == 0 {
            return Err(BlobStoreError::NotFound(locator.to_string()));
        }
        Ok(())
    }

    fn exists(&self, locator: &BlobLocator) -> BlobStoreResult<bool> {
        let conn = self.conn.lock().map_err(|e| BlobStoreError::Storage(e.to_string()))?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM blobs WHERE blob_id = ?",
            params![locator.as_str()],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }
}
