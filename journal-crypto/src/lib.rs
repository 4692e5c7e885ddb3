//! Encryption layer for the sealed journal.
//!
//! Provides the stateless primitives everything else is built on:
//! - AES-256-CBC payload encryption with one-time keys
//! - RSA-OAEP wrapping of those keys for a recipient keypair
//! - PBKDF2-HMAC-SHA256 passphrase protection of the recipient's private key
//!
//! # Architecture
//!
//! Encryption uses a two-tier key system:
//!
//! 1. **Vault Keypair**: An RSA-2048 keypair. The public half is stored in
//!    clear; the private half is stored only wrapped under a key derived from
//!    the user's passphrase.
//!
//! 2. **Payload Key**: A random AES-256 key generated for every encryption.
//!    It is wrapped with the vault public key and stored beside the
//!    ciphertext, so writing never needs the passphrase.
//!
//! Envelopes carry no authentication tag. Corruption is only detected when it
//! breaks the OAEP unwrap or the CBC padding.

pub mod cipher;
pub mod envelope;
mod error;
mod key;
pub mod keypair;

pub use cipher::{IV_SIZE, KEY_SIZE, SymmetricKey, decrypt_cbc, encrypt_cbc};
pub use envelope::{
    BLOB_DELIMITER, Envelope, PassphraseProtectedKey, decrypt_private_key, encrypt_private_key,
    open_envelope, seal_envelope,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{DEFAULT_ITERATIONS, KdfParams, SALT_SIZE, Salt, derive_key};
pub use keypair::{
    KeyPair, PrivateKey, PublicKey, generate_keypair, parse_private_key, parse_public_key,
    private_key_to_pem, public_key_to_pem,
};
