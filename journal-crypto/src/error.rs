//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the envelope and key-wrapping primitives.
///
/// Variants line up with the failure causes callers need to tell apart;
/// none of them carry key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid key record: {0}")]
    InvalidRecord(String),

    #[error("wrong passphrase or corrupt key record")]
    WrongPassphraseOrCorrupt,

    #[error("key unwrap failed (wrong key or tampered data)")]
    KeyMismatchOrCorrupt,

    #[error("symmetric decryption failed (bad key, iv or padding)")]
    CipherOrPadding,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key encoding failed: {0}")]
    KeyEncoding(String),
}
