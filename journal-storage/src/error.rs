//! Storage error types.

use journal_blobstore::BlobStoreError;
use journal_vault::{KeyId, VaultError};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that abort a save or load.
///
/// Decryption problems are not errors at this level; reads degrade to a
/// placeholder instead.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot encrypt: no encryption key available")]
    MissingKey,

    #[error("cannot encrypt: bound key {0} no longer exists")]
    BoundKeyMissing(KeyId),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobStoreError),

    #[error("vault error: {0}")]
    Vault(VaultError),

    #[error("database error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VaultError> for StorageError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::MissingKey => StorageError::MissingKey,
            other => StorageError::Vault(other),
        }
    }
}

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        StorageError::Storage(err.to_string())
    }
}
