//! Hybrid envelope encryption and passphrase-protected private keys.
//!
//! A payload is encrypted with a one-time AES-256-CBC key; that key is then
//! wrapped with the recipient's RSA public key using OAEP. Only the wrap is
//! asymmetric, so its cost is fixed regardless of payload size.
//!
//! The private half of the recipient keypair is stored wrapped under a
//! passphrase-derived key (PBKDF2 -> AES-256-CBC) and serialized as three
//! base64 tokens joined by [`BLOB_DELIMITER`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::cipher::{self, SymmetricKey};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KdfParams, Salt, derive_key};
use crate::keypair::{parse_private_key, private_key_to_pem};

/// Separator between the salt, iv and ciphertext tokens of a wrapped key blob.
pub const BLOB_DELIMITER: &str = "--";

/// Output of hybrid encryption: payload ciphertext, wrapped one-time key and IV.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub ciphertext: Vec<u8>,
    pub wrapped_key: Vec<u8>,
    pub iv: Vec<u8>,
}

// Stored records were written with OpenSSL's PKCS1_OAEP_PADDING, which is
// SHA-1 for both the label hash and MGF1.
fn oaep() -> Oaep {
    Oaep::new::<Sha1>()
}

/// Encrypts `plaintext` for the holder of `recipient`'s private key.
pub fn seal_envelope(plaintext: &[u8], recipient: &RsaPublicKey) -> CryptoResult<Envelope> {
    let key = SymmetricKey::generate();
    let iv = cipher::generate_iv();

    let ciphertext = cipher::encrypt_cbc(key.as_bytes(), &iv, plaintext)?;
    let wrapped_key = recipient
        .encrypt(&mut OsRng, oaep(), key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("key wrap failed: {e}")))?;

    Ok(Envelope {
        ciphertext,
        wrapped_key,
        iv: iv.to_vec(),
    })
}

/// Decrypts an envelope with the holder's private key.
///
/// Fails with [`CryptoError::KeyMismatchOrCorrupt`] when the wrapped key does
/// not open under `holder`, and [`CryptoError::CipherOrPadding`] when the
/// payload does not decrypt under the recovered key.
pub fn open_envelope(envelope: &Envelope, holder: &RsaPrivateKey) -> CryptoResult<Vec<u8>> {
    let key = Zeroizing::new(
        holder
            .decrypt(oaep(), &envelope.wrapped_key)
            .map_err(|_| CryptoError::KeyMismatchOrCorrupt)?,
    );
    cipher::decrypt_cbc(&key, &envelope.iv, &envelope.ciphertext)
}

/// Private key encrypted under a passphrase-derived key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassphraseProtectedKey {
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl PassphraseProtectedKey {
    /// Serializes as `base64(salt)--base64(iv)--base64(ciphertext)`.
    pub fn to_blob(&self) -> String {
        [
            STANDARD.encode(&self.salt),
            STANDARD.encode(&self.iv),
            STANDARD.encode(&self.ciphertext),
        ]
        .join(BLOB_DELIMITER)
    }

    /// Parses a stored blob. Anything other than three base64 fields is an
    /// invalid record.
    pub fn from_blob(blob: &str) -> CryptoResult<Self> {
        let parts: Vec<&str> = blob.trim().split(BLOB_DELIMITER).collect();
        if parts.len() != 3 {
            return Err(CryptoError::InvalidRecord(format!(
                "expected 3 fields in wrapped key, found {}",
                parts.len()
            )));
        }

        let decode = |name: &str, token: &str| {
            STANDARD
                .decode(token)
                .map_err(|e| CryptoError::InvalidRecord(format!("{name} is not base64: {e}")))
        };

        Ok(Self {
            salt: decode("salt", parts[0])?,
            iv: decode("iv", parts[1])?,
            ciphertext: decode("ciphertext", parts[2])?,
        })
    }
}

/// Wraps a private key under `passphrase`.
pub fn encrypt_private_key(
    key: &RsaPrivateKey,
    passphrase: &str,
) -> CryptoResult<PassphraseProtectedKey> {
    let salt = Salt::random();
    let wrapping_key = derive_key(passphrase, salt.as_bytes(), &KdfParams::default())?;
    let iv = cipher::generate_iv();

    let pem = private_key_to_pem(key)?;
    let ciphertext = cipher::encrypt_cbc(wrapping_key.as_bytes(), &iv, pem.as_bytes())?;

    Ok(PassphraseProtectedKey {
        salt: salt.as_bytes().to_vec(),
        iv: iv.to_vec(),
        ciphertext,
    })
}

/// Unwraps a passphrase-protected private key.
///
/// A padding failure means the passphrase was wrong or the blob was altered
/// ([`CryptoError::WrongPassphraseOrCorrupt`]); bytes that decrypt but do not
/// parse as a private key are an [`CryptoError::InvalidRecord`].
pub fn decrypt_private_key(
    protected: &PassphraseProtectedKey,
    passphrase: &str,
) -> CryptoResult<RsaPrivateKey> {
    let wrapping_key = derive_key(passphrase, &protected.salt, &KdfParams::default())?;

    let plaintext = Zeroizing::new(
        cipher::decrypt_cbc(wrapping_key.as_bytes(), &protected.iv, &protected.ciphertext)
            .map_err(|_| CryptoError::WrongPassphraseOrCorrupt)?,
    );

    let pem = std::str::from_utf8(&plaintext)
        .map_err(|_| CryptoError::InvalidRecord("decrypted key is not valid UTF-8".into()))?;
    parse_private_key(pem)
}
