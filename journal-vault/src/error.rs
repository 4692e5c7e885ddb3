//! Vault error types.

use journal_crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no encryption key has been generated")]
    MissingKey,
    #[error("wrong passphrase or corrupt key record")]
    WrongPassphraseOrCorrupt,
    #[error("invalid key record: {0}")]
    InvalidRecord(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;

impl VaultError {
    /// Whether this failure should be reported to the user as "invalid
    /// password". A wrong passphrase can surface either as a padding failure
    /// or as garbage that does not parse as a key.
    pub fn is_invalid_password(&self) -> bool {
        matches!(
            self,
            VaultError::WrongPassphraseOrCorrupt | VaultError::InvalidRecord(_)
        )
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidInput(msg) => VaultError::InvalidInput(msg),
            CryptoError::InvalidRecord(msg) => VaultError::InvalidRecord(msg),
            CryptoError::WrongPassphraseOrCorrupt => VaultError::WrongPassphraseOrCorrupt,
            other => VaultError::Crypto(other.to_string()),
        }
    }
}

impl From<duckdb::Error> for VaultError {
    fn from(err: duckdb::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Storage(format!("session data: {err}"))
    }
}
