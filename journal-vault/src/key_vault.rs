//! Persistent key records.
//!
//! Each record pairs a clear-text public key with its private half wrapped
//! under a passphrase-derived key. Records are immutable once written; the
//! newest one is the active key used for all new encryptions.

use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use journal_crypto::{
    PassphraseProtectedKey, PrivateKey, PublicKey, decrypt_private_key, encrypt_private_key,
    generate_keypair, parse_public_key,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{VaultError, VaultResult};
use crate::export::KeyExport;

/// Identifier of a key record. UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for KeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| VaultError::InvalidInput(format!("key id {s:?}: {e}")))
    }
}

/// Private key blob as stored: `base64(salt)--base64(iv)--base64(ciphertext)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedPrivateKey(String);

impl WrappedPrivateKey {
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the blob into its salt, iv and ciphertext.
    pub fn parse(&self) -> VaultResult<PassphraseProtectedKey> {
        Ok(PassphraseProtectedKey::from_blob(&self.0)?)
    }
}

/// A stored keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVaultRecord {
    pub id: KeyId,
    pub public_key_pem: String,
    pub wrapped_private_key: WrappedPrivateKey,
    pub created_at: DateTime<Utc>,
}

impl KeyVaultRecord {
    pub fn public_key(&self) -> VaultResult<PublicKey> {
        Ok(parse_public_key(&self.public_key_pem)?)
    }
}

/// DuckDB-backed store of key records.
pub struct KeyVault {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = "SELECT id, public_key, private_key, created_at FROM encryption_keys";

impl KeyVault {
    /// Opens a key vault backed by a DuckDB file.
    pub fn open(db_path: &Path) -> VaultResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA memory_limit='64MB'; PRAGMA threads=1;")?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Opens with an existing shared connection.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> VaultResult<Self> {
        let vault = Self { conn };
        vault.ensure_tables()?;
        Ok(vault)
    }

    pub fn open_in_memory() -> VaultResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    fn ensure_tables(&self) -> VaultResult<()> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS encryption_keys (
                id VARCHAR PRIMARY KEY,
                public_key VARCHAR NOT NULL,
                private_key VARCHAR NOT NULL,
                created_at BIGINT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Generates a new keypair, wraps its private half under `passphrase`
    /// and stores the record. The new record becomes the active key.
    pub fn generate_and_store(&self, passphrase: &str) -> VaultResult<KeyVaultRecord> {
        if passphrase.trim().is_empty() {
            return Err(VaultError::InvalidInput("passphrase must not be blank".into()));
        }

        let keypair = generate_keypair()?;
        let wrapped = encrypt_private_key(&keypair.private, passphrase)?;

        let record = KeyVaultRecord {
            id: KeyId::new(),
            public_key_pem: keypair.public_key_pem()?,
            wrapped_private_key: WrappedPrivateKey::new(wrapped.to_blob()),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT INTO encryption_keys (id, public_key, private_key, created_at)
             VALUES (?, ?, ?, ?)",
            params![
                record.id.to_string(),
                record.public_key_pem,
                record.wrapped_private_key.as_str(),
                record.created_at.timestamp_millis(),
            ],
        )?;

        info!(key_id = %record.id, "generated new encryption key");
        Ok(record)
    }

    /// Recovers the private key of `record` with `passphrase`.
    ///
    /// Fails with `InvalidRecord` when the stored blob is malformed or does
    /// not decrypt to a key, and `WrongPassphraseOrCorrupt` when decryption
    /// itself fails. Both mean "invalid password" to the user.
    pub fn unwrap_private_key(
        &self,
        record: &KeyVaultRecord,
        passphrase: &str,
    ) -> VaultResult<PrivateKey> {
        if passphrase.trim().is_empty() {
            return Err(VaultError::InvalidInput("passphrase must not be blank".into()));
        }
        let protected = record.wrapped_private_key.parse()?;
        let key = decrypt_private_key(&protected, passphrase)?;
        debug!(key_id = %record.id, "unwrapped private key");
        Ok(key)
    }

    /// The most recently created record, if any.
    pub fn active_key(&self) -> VaultResult<Option<KeyVaultRecord>> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        let result = conn.query_row(
            &format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT 1"),
            [],
            row_to_raw,
        );
        match result {
            Ok(raw) => Ok(Some(raw.into_record()?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find(&self, id: &KeyId) -> VaultResult<Option<KeyVaultRecord>> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        let result = conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?"),
            params![id.to_string()],
            row_to_raw,
        );
        match result {
            Ok(raw) => Ok(Some(raw.into_record()?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All records, newest first.
    pub fn list(&self) -> VaultResult<Vec<KeyVaultRecord>> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        let mut stmt =
            conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC"))?;
        let raws = stmt
            .query_map([], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Public key and still-wrapped private key of a record, for download.
    pub fn export(&self, id: &KeyId) -> VaultResult<KeyExport> {
        let record = self
            .find(id)?
            .ok_or_else(|| VaultError::KeyNotFound(id.to_string()))?;
        Ok(KeyExport::from_record(&record))
    }

    pub fn count(&self) -> VaultResult<usize> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM encryption_keys", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

struct RawRecord {
    id: String,
    public_key: String,
    private_key: String,
    created_at: i64,
}

fn row_to_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        public_key: row.get(1)?,
        private_key: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl RawRecord {
    fn into_record(self) -> VaultResult<KeyVaultRecord> {
        let id = Uuid::parse_str(&self.id)
            .map(KeyId)
            .map_err(|e| VaultError::InvalidRecord(format!("key id {:?}: {e}", self.id)))?;
        let created_at = DateTime::from_timestamp_millis(self.created_at).ok_or_else(|| {
            VaultError::InvalidRecord(format!("created_at out of range: {}", self.created_at))
        })?;
        Ok(KeyVaultRecord {
            id,
            public_key_pem: self.public_key,
            wrapped_private_key: WrappedPrivateKey(self.private_key),
            created_at,
        })
    }
}
