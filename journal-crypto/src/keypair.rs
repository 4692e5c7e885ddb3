//! RSA keypairs and their PEM encodings.
//!
//! Private keys are encoded as PKCS#1 PEM (`BEGIN RSA PRIVATE KEY`) and
//! public keys as SPKI PEM (`BEGIN PUBLIC KEY`), matching what the stored
//! records contain. PKCS#8 private keys are accepted on input.

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

pub use rsa::{RsaPrivateKey as PrivateKey, RsaPublicKey as PublicKey};

/// Modulus size for newly generated keys.
pub const RSA_BITS: usize = 2048;

/// An RSA keypair. The private half zeroizes itself on drop.
pub struct KeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl KeyPair {
    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    pub fn public_key_pem(&self) -> CryptoResult<String> {
        public_key_to_pem(&self.public)
    }

    pub fn private_key_pem(&self) -> CryptoResult<Zeroizing<String>> {
        private_key_to_pem(&self.private)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Generates a new 2048-bit RSA keypair.
pub fn generate_keypair() -> CryptoResult<KeyPair> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    tracing::debug!(bits = RSA_BITS, "generated RSA keypair");
    Ok(KeyPair::from_private(private))
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> CryptoResult<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

pub fn private_key_to_pem(key: &RsaPrivateKey) -> CryptoResult<Zeroizing<String>> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

/// Parses an SPKI (or PKCS#1) public key PEM.
pub fn parse_public_key(pem: &str) -> CryptoResult<RsaPublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;

    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidRecord(format!("public key PEM: {e}")))
}

/// Parses a PKCS#1 or PKCS#8 private key PEM.
pub fn parse_private_key(pem: &str) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| CryptoError::InvalidRecord(format!("private key PEM: {e}")))
}
