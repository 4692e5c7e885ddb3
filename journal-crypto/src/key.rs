//! Passphrase-based key derivation (PBKDF2-HMAC-SHA256).

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use crate::cipher::{KEY_SIZE, SymmetricKey};
use crate::error::{CryptoError, CryptoResult};

/// Size of the KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Iteration count used by every key record written so far.
pub const DEFAULT_ITERATIONS: u32 = 20_000;

/// Random salt for passphrase key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// PBKDF2 parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

/// Derives an AES-256 wrapping key from a passphrase.
///
/// Salts of any length are accepted so records with a non-standard salt can
/// still be opened; new records always use [`SALT_SIZE`].
pub fn derive_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> CryptoResult<SymmetricKey> {
    if passphrase.is_empty() {
        return Err(CryptoError::InvalidInput("passphrase must not be blank".into()));
    }
    if params.iterations == 0 {
        return Err(CryptoError::InvalidInput("iteration count must be positive".into()));
    }

    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, params.iterations, &mut out);
    let key = SymmetricKey::from_bytes(out);
    zeroize::Zeroize::zeroize(&mut out);
    Ok(key)
}
