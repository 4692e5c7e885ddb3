//! DuckDB persistence for encrypted fields.
//!
//! A save happens in two steps. [`SealedStore::stage`] binds the key and
//! seals the pending value into a [`PendingWrite`] without touching
//! storage; [`SealedStore::commit`] writes it as one row. A failure in
//! either step leaves the stored row and the in-memory field as they were.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use duckdb::{Connection, params};
use journal_blobstore::{BlobLocator, BlobStore};
use journal_crypto::seal_envelope;
use journal_vault::{KeyId, KeyVault, KeyVaultRecord, RequestContext};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::field::{EncryptedField, FieldAddress, FieldValue};
use crate::format::{EnvelopeColumns, EnvelopeFormat, PayloadBody, WritePlan};
use crate::sentinel::FieldKind;

/// A sealed value waiting to be written. Holds only ciphertext.
#[derive(Debug)]
pub struct PendingWrite {
    address: FieldAddress,
    key_id: Option<KeyId>,
    /// `None` writes an empty field.
    plan: Option<WritePlan>,
}

impl PendingWrite {
    pub fn address(&self) -> &FieldAddress {
        &self.address
    }

    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    pub fn format(&self) -> Option<EnvelopeFormat> {
        self.plan.as_ref().map(|p| p.format)
    }
}

/// Columns of a row from the original application, before layouts were
/// recorded. Ciphertext columns there held base64 text.
#[derive(Debug, Clone, Default)]
pub struct LegacyRow {
    pub content: Option<String>,
    /// Usually base64 text. Rows hit by the old key format issue hold the
    /// raw RSA output.
    pub encrypted_key: Option<Vec<u8>>,
    pub initialization_vector: Option<String>,
    /// Locator of a blob already copied into the configured blob store.
    pub blob_locator: Option<String>,
}

/// Persists encrypted fields in the `sealed_fields` table.
pub struct SealedStore {
    conn: Arc<Mutex<Connection>>,
    vault: Arc<KeyVault>,
    blobs: Option<Arc<dyn BlobStore>>,
}

const SELECT_COLUMNS: &str =
    "SELECT key_id, format, payload, wrapped_key, iv, locator FROM sealed_fields";

impl SealedStore {
    /// Opens with an existing shared connection.
    pub fn open_with_conn(
        conn: Arc<Mutex<Connection>>,
        vault: Arc<KeyVault>,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> StorageResult<Self> {
        let store = Self { conn, vault, blobs };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory(
        vault: Arc<KeyVault>,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)), vault, blobs)
    }

    fn ensure_tables(&self) -> StorageResult<()> {
        let conn = self.conn.lock().map_err(|e| StorageError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sealed_fields (
                namespace VARCHAR NOT NULL,
                record_id VARCHAR NOT NULL,
                key_id VARCHAR,
                format VARCHAR,
                payload BLOB,
                wrapped_key BLOB,
                iv VARCHAR,
                locator VARCHAR,
                updated_at BIGINT NOT NULL,
                PRIMARY KEY (namespace, record_id)
            );",
        )?;
        Ok(())
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn blobs(&self) -> Option<&dyn BlobStore> {
        self.blobs.as_deref()
    }

    /// Loads a field, or an empty one if nothing is stored at `address`.
    pub fn load(&self, address: &FieldAddress, kind: FieldKind) -> StorageResult<EncryptedField> {
        let conn = self.conn.lock().map_err(|e| StorageError::Storage(e.to_string()))?;
        let result = conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE namespace = ? AND record_id = ?"),
            params![address.namespace, address.record_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<Vec<u8>>>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        );
        let (key_id, format, payload, wrapped_key, iv, locator) = match result {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => {
                return Ok(EncryptedField::new(address.clone(), kind));
            }
            Err(e) => return Err(e.into()),
        };
        drop(conn);

        let key_id = key_id
            .map(|id| {
                id.parse::<KeyId>()
                    .map_err(|_| StorageError::Storage(format!("bad key id on {address}: {id}")))
            })
            .transpose()?;
        let format = match format {
            None => None,
            Some(tag) => Some(EnvelopeFormat::from_tag(&tag).ok_or_else(|| {
                StorageError::Storage(format!("unknown envelope format {tag:?} on {address}"))
            })?),
        };

        Ok(EncryptedField::from_stored(
            address.clone(),
            kind,
            key_id,
            EnvelopeColumns {
                format,
                payload,
                wrapped_key,
                iv,
                locator,
            },
        ))
    }

    /// Seals the field's pending value under its bound key, binding it to
    /// the active key on first save.
    ///
    /// Fails with `MissingKey` when the field is unbound and no key exists.
    /// Nothing is written.
    pub fn stage(&self, field: &EncryptedField) -> StorageResult<PendingWrite> {
        let Some(plaintext) = field.pending() else {
            return Ok(PendingWrite {
                address: field.address().clone(),
                key_id: field.key_id(),
                plan: None,
            });
        };

        let record = self.bound_key(field)?;
        let public_key = record.public_key()?;
        let envelope = seal_envelope(plaintext, &public_key)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        Ok(PendingWrite {
            address: field.address().clone(),
            key_id: Some(record.id),
            plan: Some(WritePlan::for_envelope(envelope, self.blobs.is_some())),
        })
    }

    fn bound_key(&self, field: &EncryptedField) -> StorageResult<KeyVaultRecord> {
        match field.key_id() {
            Some(id) => self
                .vault
                .find(&id)?
                .ok_or(StorageError::BoundKeyMissing(id)),
            None => self.vault.active_key()?.ok_or(StorageError::MissingKey),
        }
    }

    /// Writes a staged value and updates `field` to match.
    ///
    /// External ciphertext is stored before the row and removed again if the
    /// row write fails. A blob replaced by this write is removed afterwards.
    pub fn commit(&self, field: &mut EncryptedField, write: PendingWrite) -> StorageResult<()> {
        if write.address != *field.address() {
            return Err(StorageError::InvalidInput(format!(
                "staged write for {} committed to {}",
                write.address,
                field.address()
            )));
        }
        if write.plan.is_none() && !field.is_dirty() {
            return Ok(());
        }

        let superseded = match field.current_locator() {
            Some(locator) => Some(locator),
            None => self.stored_locator(&write.address)?,
        };

        let mut new_locator: Option<BlobLocator> = None;
        let columns = match write.plan {
            None => EnvelopeColumns::default(),
            Some(plan) => {
                if let PayloadBody::Blob(ciphertext) = &plan.body {
                    let blobs = self.blobs.as_ref().ok_or_else(|| {
                        StorageError::InvalidInput("write planned for a blob store that is not configured".into())
                    })?;
                    new_locator = Some(blobs.put(ciphertext)?);
                }
                plan.into_columns(new_locator.as_ref())
            }
        };

        if let Err(e) = self.write_row(&write.address, write.key_id, &columns) {
            if let (Some(locator), Some(blobs)) = (&new_locator, &self.blobs) {
                if let Err(cleanup) = blobs.delete(locator) {
                    warn!(field = %write.address, error = %cleanup, "failed to remove orphaned blob");
                }
            }
            return Err(e);
        }

        if let (Some(old), Some(blobs)) = (superseded, &self.blobs) {
            if Some(&old) != new_locator.as_ref() {
                if let Err(e) = blobs.delete(&old) {
                    warn!(field = %write.address, error = %e, "failed to remove superseded blob");
                }
            }
        }

        debug!(
            field = %write.address,
            format = columns.format.map(EnvelopeFormat::as_tag),
            "committed field"
        );
        field.apply_commit(write.key_id, columns);
        Ok(())
    }

    /// Stages and commits in one call.
    pub fn save(&self, field: &mut EncryptedField) -> StorageResult<()> {
        let write = self.stage(field)?;
        self.commit(field, write)
    }

    pub fn get(&self, field: &EncryptedField, ctx: &RequestContext) -> FieldValue<Vec<u8>> {
        field.get(ctx, self.blobs.as_deref())
    }

    pub fn get_text(&self, field: &EncryptedField, ctx: &RequestContext) -> FieldValue<String> {
        field.get_text(ctx, self.blobs.as_deref())
    }

    /// Removes the row at `address` and its external blob. Returns whether a
    /// row existed.
    pub fn delete(&self, address: &FieldAddress) -> StorageResult<bool> {
        let locator = self.stored_locator(address)?;
        let conn = self.conn.lock().map_err(|e| StorageError::Storage(e.to_string()))?;
        let affected = conn.execute(
            "DELETE FROM sealed_fields WHERE namespace = ? AND record_id = ?",
            params![address.namespace, address.record_id],
        )?;
        drop(conn);

        if let (Some(locator), Some(blobs)) = (locator, &self.blobs) {
            if let Err(e) = blobs.delete(&locator) {
                warn!(field = %address, error = %e, "failed to remove blob of deleted field");
            }
        }
        Ok(affected > 0)
    }

    /// Copies a row from the original application verbatim, without a
    /// layout tag. Its layout is worked out on every read.
    pub fn import_legacy(
        &self,
        address: &FieldAddress,
        key_id: KeyId,
        row: LegacyRow,
    ) -> StorageResult<()> {
        if self.vault.find(&key_id)?.is_none() {
            return Err(StorageError::Vault(journal_vault::VaultError::KeyNotFound(
                key_id.to_string(),
            )));
        }

        let split = row.encrypted_key.as_deref().is_some_and(|k| !k.is_empty())
            && row.initialization_vector.as_deref().is_some_and(|iv| !iv.is_empty());
        let external = row.blob_locator.as_deref().is_some_and(|l| !l.is_empty());

        // Split rows kept base64 text where the binary column now holds raw
        // ciphertext. Legacy containers and placeholders stay text.
        let payload = match row.content {
            None => None,
            Some(_) if external => None,
            Some(text) if split => Some(STANDARD.decode(text.trim()).map_err(|_| {
                StorageError::InvalidInput(format!("content of {address} is not base64"))
            })?),
            Some(text) => Some(text.into_bytes()),
        };

        let columns = EnvelopeColumns {
            format: None,
            payload,
            wrapped_key: row.encrypted_key,
            iv: row.initialization_vector,
            locator: row.blob_locator,
        };
        self.write_row(address, Some(key_id), &columns)?;
        info!(field = %address, format = columns.detect().as_tag(), "imported legacy field");
        Ok(())
    }

    /// Number of stored rows in `namespace`.
    pub fn count(&self, namespace: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().map_err(|e| StorageError::Storage(e.to_string()))?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sealed_fields WHERE namespace = ?",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Locator of the blob currently stored for `address`. A malformed
    /// locator is logged and treated as absent.
    fn stored_locator(&self, address: &FieldAddress) -> StorageResult<Option<BlobLocator>> {
        let conn = self.conn.lock().map_err(|e| StorageError::Storage(e.to_string()))?;
        let result = conn.query_row(
            "SELECT locator FROM sealed_fields WHERE namespace = ? AND record_id = ?",
            params![address.namespace, address.record_id],
            |row| row.get::<_, Option<String>>(0),
        );
        let locator = match result {
            Ok(Some(locator)) if !locator.is_empty() => locator,
            Ok(_) | Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match BlobLocator::parse(&locator) {
            Ok(locator) => Ok(Some(locator)),
            Err(e) => {
                warn!(field = %address, error = %e, "ignoring malformed blob locator");
                Ok(None)
            }
        }
    }

    fn write_row(
        &self,
        address: &FieldAddress,
        key_id: Option<KeyId>,
        columns: &EnvelopeColumns,
    ) -> StorageResult<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().map_err(|e| StorageError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO sealed_fields
                (namespace, record_id, key_id, format, payload, wrapped_key, iv, locator, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                address.namespace,
                address.record_id,
                key_id.map(|id| id.to_string()),
                columns.format.map(EnvelopeFormat::as_tag),
                columns.payload,
                columns.wrapped_key,
                columns.iv,
                columns.locator,
                now,
            ],
        )?;
        Ok(())
    }
}
