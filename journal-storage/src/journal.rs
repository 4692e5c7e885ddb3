//! One handle over the vault, sessions and sealed fields of a journal.

use duckdb::Connection;
use journal_blobstore::{BlobStore, DuckDbBlobStore, FsBlobStore};
use journal_vault::{
    DuckDbSessionStore, KeyVault, RequestContext, SessionId, SessionSecretHolder, SessionStore,
};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::config::JournalConfig;
use crate::error::StorageResult;
use crate::field::{EncryptedField, FieldAddress, FieldValue};
use crate::sealed_store::SealedStore;
use crate::sentinel::FieldKind;
use crate::{apply_resource_limits, open_duckdb_with_wal_recovery};

/// Keys, sessions and sealed fields share one DuckDB connection.
pub struct Journal {
    config: JournalConfig,
    vault: Arc<KeyVault>,
    sessions: Arc<DuckDbSessionStore>,
    secrets: SessionSecretHolder,
    store: SealedStore,
}

impl Journal {
    pub fn open(config: JournalConfig) -> StorageResult<Self> {
        config.validate()?;

        let conn = if config.is_in_memory() {
            let conn = Connection::open_in_memory()?;
            apply_resource_limits(&conn, &config.memory_limit, config.threads)?;
            conn
        } else {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            open_duckdb_with_wal_recovery(&config.db_path, &config.memory_limit, config.threads)?
        };
        let conn = Arc::new(Mutex::new(conn));

        let blobs: Option<Arc<dyn BlobStore>> = match &config.blob_root {
            Some(root) => Some(Arc::new(FsBlobStore::open(root)?)),
            None if config.blobs_in_database => {
                Some(Arc::new(DuckDbBlobStore::open_with_conn(conn.clone())?))
            }
            None => None,
        };

        let vault = Arc::new(KeyVault::open_with_conn(conn.clone())?);
        let sessions = Arc::new(DuckDbSessionStore::open_with_conn(
            conn.clone(),
            config.session_config(),
        )?);
        let secrets = SessionSecretHolder::new(vault.clone(), sessions.clone());
        let store = SealedStore::open_with_conn(conn, vault.clone(), blobs)?;

        info!(
            db = %config.db_path.display(),
            external_blobs = config.uses_external_blobs(),
            "opened journal"
        );

        Ok(Self {
            config,
            vault,
            sessions,
            secrets,
            store,
        })
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open(JournalConfig::in_memory())
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    pub fn secrets(&self) -> &SessionSecretHolder {
        &self.secrets
    }

    pub fn store(&self) -> &SealedStore {
        &self.store
    }

    pub fn begin_request(&self, session_id: Option<SessionId>) -> StorageResult<RequestContext> {
        Ok(self.secrets.begin_request(session_id)?)
    }

    pub fn unlock(&self, ctx: &mut RequestContext, passphrase: &str) -> StorageResult<()> {
        Ok(self.secrets.unlock(ctx, passphrase)?)
    }

    pub fn lock(&self, ctx: &mut RequestContext) -> StorageResult<()> {
        Ok(self.secrets.lock(ctx)?)
    }

    /// Loads the field at `address`, empty if nothing is stored there.
    pub fn field(&self, address: &FieldAddress, kind: FieldKind) -> StorageResult<EncryptedField> {
        self.store.load(address, kind)
    }

    pub fn save(&self, field: &mut EncryptedField) -> StorageResult<()> {
        self.store.save(field)
    }

    /// Loads and decrypts a text field in one step.
    pub fn read_text(
        &self,
        address: &FieldAddress,
        ctx: &RequestContext,
    ) -> StorageResult<FieldValue<String>> {
        let field = self.store.load(address, FieldKind::Text)?;
        Ok(self.store.get_text(&field, ctx))
    }

    /// Drops sessions that have been idle past the configured timeout.
    pub fn purge_expired_sessions(&self) -> StorageResult<usize> {
        Ok(self.sessions.purge_expired()?)
    }
}
