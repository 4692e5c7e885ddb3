//! Placeholder strings shown in place of content that cannot be decrypted.

use journal_crypto::CryptoError;
use serde::{Deserialize, Serialize};

/// How a field's plaintext is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// UTF-8 text, such as an entry body.
    Text,
    /// Arbitrary bytes, such as an attachment.
    Binary,
}

/// Why a stored value could not be turned back into plaintext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecryptFailure {
    /// The session is locked.
    KeyUnavailable,
    /// Base64, container or text encoding is malformed.
    CorruptEncoding,
    /// The wrapped key did not open under the session key.
    KeyMismatchOrCorrupt,
    /// The payload did not decrypt under the recovered key.
    CipherOrPadding,
    UnexpectedInternal,
}

const TEXT_PLACEHOLDERS: [&str; 5] = [
    "[Content Encrypted - Key Unavailable]",
    "[Content Corrupted - Invalid Encoding]",
    "[Content Decryption Failed - RSA Error]",
    "[Content Decryption Failed - AES Error]",
    "[Content Decryption Failed - Unexpected Error]",
];

const BINARY_PLACEHOLDERS: [&str; 5] = [
    "[Data Encrypted - Key Unavailable]",
    "[Data Corrupted - Invalid Encoding]",
    "[Data Decryption Failed - RSA Error]",
    "[Data Decryption Failed - AES Error]",
    "[Data Decryption Failed - Unexpected Error]",
];

impl DecryptFailure {
    pub fn placeholder(self, kind: FieldKind) -> &'static str {
        let idx = match self {
            DecryptFailure::KeyUnavailable => 0,
            DecryptFailure::CorruptEncoding => 1,
            DecryptFailure::KeyMismatchOrCorrupt => 2,
            DecryptFailure::CipherOrPadding => 3,
            DecryptFailure::UnexpectedInternal => 4,
        };
        kind.placeholders()[idx]
    }
}

impl From<&CryptoError> for DecryptFailure {
    fn from(err: &CryptoError) -> Self {
        match err {
            CryptoError::KeyMismatchOrCorrupt => DecryptFailure::KeyMismatchOrCorrupt,
            CryptoError::CipherOrPadding => DecryptFailure::CipherOrPadding,
            _ => DecryptFailure::UnexpectedInternal,
        }
    }
}

impl FieldKind {
    fn placeholders(self) -> &'static [&'static str; 5] {
        match self {
            FieldKind::Text => &TEXT_PLACEHOLDERS,
            FieldKind::Binary => &BINARY_PLACEHOLDERS,
        }
    }

    /// Prefix shared by every placeholder of this kind, including ones
    /// written by older versions.
    pub fn placeholder_prefix(self) -> &'static str {
        match self {
            FieldKind::Text => "[Content ",
            FieldKind::Binary => "[Data ",
        }
    }

    /// Whether `value` is exactly one of the current placeholders.
    pub fn is_placeholder(self, value: &[u8]) -> bool {
        self.placeholders().iter().any(|p| p.as_bytes() == value)
    }

    /// Whether a stored payload is placeholder text rather than ciphertext.
    pub(crate) fn is_stored_placeholder(self, payload: &[u8]) -> bool {
        payload.starts_with(self.placeholder_prefix().as_bytes())
            && payload.ends_with(b"]")
            && std::str::from_utf8(payload).is_ok()
    }
}
