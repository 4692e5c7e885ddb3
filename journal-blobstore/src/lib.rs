//! External storage for ciphertext too large to keep inline.
//!
//! Stores only ever see sealed bytes; they hand back an opaque
//! [`BlobLocator`] that the owning record keeps in place of the payload.

mod duckdb_store;
mod fs_store;

pub use duckdb_store::DuckDbBlobStore;
pub use fs_store::FsBlobStore;

use std::fmt;

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob locator: {0:?}")]
    InvalidLocator(String),
    #[error("blob corrupted: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

impl From<duckdb::Error> for BlobStoreError {
    fn from(err: duckdb::Error) -> Self {
        BlobStoreError::Storage(err.to_string())
    }
}

// ============================================================================
// BlobLocator
// ============================================================================

/// Opaque reference to a stored blob: 32 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobLocator(String);

impl BlobLocator {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validates a locator read back from storage.
    pub fn parse(s: &str) -> BlobStoreResult<Self> {
        let valid = s.len() == 32
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(BlobStoreError::InvalidLocator(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobLocator({})", self.0)
    }
}

// ============================================================================
// BlobStore
// ============================================================================

/// A place to keep sealed payloads outside the record row.
pub trait BlobStore: Send + Sync {
    /// Stores `data` under a fresh locator.
    fn put(&self, data: &[u8]) -> BlobStoreResult<BlobLocator>;

    fn get(&self, locator: &BlobLocator) -> BlobStoreResult<Vec<u8>>;

    /// Removes a blob. Fails with `NotFound` if it is already gone.
    fn delete(&self, locator: &BlobLocator) -> BlobStoreResult<()>;

    fn exists(&self, locator: &BlobLocator) -> BlobStoreResult<bool>;
}

pub(crate) fn content_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
