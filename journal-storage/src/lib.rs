//! Sealed field storage for the journal.
//!
//! Every sensitive attribute is held in an [`EncryptedField`] and persisted
//! by a [`SealedStore`] as an RSA/AES envelope. Reads go through a
//! [`RequestContext`](journal_vault::RequestContext) and degrade to a
//! placeholder string when the content cannot be decrypted.
//!
//! # Architecture
//!
//! - Fields are bound to one vault key on their first save and stay bound
//! - Three envelope layouts are readable; new rows use split columns, or
//!   external blobs when a blob directory is configured
//! - [`Journal`] opens the vault, session store and field store over one
//!   DuckDB connection

mod config;
mod error;
mod field;
pub mod format;
mod journal;
mod sealed_store;
mod sentinel;

pub use config::{IN_MEMORY_DB, JournalConfig};
pub use error::{StorageError, StorageResult};
pub use field::{EncryptedField, FieldAddress, FieldState, FieldValue};
pub use format::{EnvelopeColumns, EnvelopeFormat};
pub use journal::Journal;
pub use sealed_store::{LegacyRow, PendingWrite, SealedStore};
pub use sentinel::{DecryptFailure, FieldKind};

use tracing::warn;

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once.
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                warn!(
                    wal = %wal_path.display(),
                    error = %first_err,
                    "database open failed, removing stale WAL and retrying"
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Apply memory and thread limits to a DuckDB connection.
pub(crate) fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
