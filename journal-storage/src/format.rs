//! On-disk envelope layouts.
//!
//! Three layouts exist and all stay readable:
//!
//! - [`EnvelopeFormat::LegacyInline`]: the payload column holds base64 of a
//!   JSON object `{"key", "data", "iv"}`, each value itself base64. Read only.
//! - [`EnvelopeFormat::SplitColumns`]: ciphertext bytes in the payload
//!   column, base64 iv, and the wrapped key as base64. Some migrated rows
//!   hold the wrapped key as raw RSA output instead.
//! - [`EnvelopeFormat::ExternalBlob`]: like split columns, but the
//!   ciphertext lives in a [`BlobStore`] and the row keeps its locator.
//!
//! New rows always record their layout. Rows from before the layout was
//! recorded are classified by checking which columns are populated.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use journal_blobstore::{BlobLocator, BlobStore, BlobStoreError};
use journal_crypto::{CryptoError, CryptoResult, Envelope, PrivateKey, open_envelope};
use serde::Deserialize;
use tracing::debug;

use crate::sentinel::DecryptFailure;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeFormat {
    LegacyInline,
    SplitColumns,
    ExternalBlob,
}

impl EnvelopeFormat {
    pub fn as_tag(self) -> &'static str {
        match self {
            EnvelopeFormat::LegacyInline => "legacy_inline",
            EnvelopeFormat::SplitColumns => "split_columns",
            EnvelopeFormat::ExternalBlob => "external_blob",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "legacy_inline" => Some(EnvelopeFormat::LegacyInline),
            "split_columns" => Some(EnvelopeFormat::SplitColumns),
            "external_blob" => Some(EnvelopeFormat::ExternalBlob),
            _ => None,
        }
    }
}

/// The envelope columns of one stored field, exactly as persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvelopeColumns {
    /// `None` for rows written before the layout was recorded.
    pub format: Option<EnvelopeFormat>,
    pub payload: Option<Vec<u8>>,
    /// Base64 text for rows written here; raw bytes in some migrated rows.
    pub wrapped_key: Option<Vec<u8>>,
    pub iv: Option<String>,
    pub locator: Option<String>,
}

fn present(s: &Option<String>) -> bool {
    s.as_deref().is_some_and(|s| !s.is_empty())
}

fn present_bytes(b: &Option<Vec<u8>>) -> bool {
    b.as_deref().is_some_and(|b| !b.is_empty())
}

impl EnvelopeColumns {
    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.payload.as_deref().is_none_or(<[u8]>::is_empty) && !present(&self.locator)
    }

    /// The layout of this row: the recorded tag if there is one, otherwise
    /// whatever the populated columns indicate.
    pub fn detect(&self) -> EnvelopeFormat {
        if let Some(format) = self.format {
            return format;
        }
        if present(&self.locator) {
            EnvelopeFormat::ExternalBlob
        } else if present_bytes(&self.wrapped_key) && present(&self.iv) {
            EnvelopeFormat::SplitColumns
        } else {
            EnvelopeFormat::LegacyInline
        }
    }

    /// Payload that holds neither ciphertext nor key material, only text.
    pub(crate) fn bare_payload(&self) -> Option<&[u8]> {
        if present_bytes(&self.wrapped_key) || present(&self.locator) {
            return None;
        }
        self.payload.as_deref()
    }
}

// ============================================================================
// Write path
// ============================================================================

/// Where the ciphertext of a new row goes.
#[derive(Debug)]
pub enum PayloadBody {
    Inline(Vec<u8>),
    /// To be put into the blob store before the row is written.
    Blob(Vec<u8>),
}

/// Columns to write for a freshly sealed envelope.
#[derive(Debug)]
pub struct WritePlan {
    pub format: EnvelopeFormat,
    pub body: PayloadBody,
    pub wrapped_key: String,
    pub iv: String,
}

impl WritePlan {
    /// Lays out `envelope` in the newest layout available: external blob
    /// when a blob store is configured, split columns otherwise.
    pub fn for_envelope(envelope: Envelope, blob_store_available: bool) -> Self {
        let wrapped_key = STANDARD.encode(&envelope.wrapped_key);
        let iv = STANDARD.encode(&envelope.iv);
        let (format, body) = if blob_store_available {
            (EnvelopeFormat::ExternalBlob, PayloadBody::Blob(envelope.ciphertext))
        } else {
            (EnvelopeFormat::SplitColumns, PayloadBody::Inline(envelope.ciphertext))
        };
        Self {
            format,
            body,
            wrapped_key,
            iv,
        }
    }

    /// The columns this plan produces once the blob (if any) has been
    /// stored under `locator`.
    pub fn into_columns(self, locator: Option<&BlobLocator>) -> EnvelopeColumns {
        let payload = match self.body {
            PayloadBody::Inline(bytes) => Some(bytes),
            PayloadBody::Blob(_) => None,
        };
        EnvelopeColumns {
            format: Some(self.format),
            payload,
            wrapped_key: Some(self.wrapped_key.into_bytes()),
            iv: Some(self.iv),
            locator: locator.map(|l| l.as_str().to_string()),
        }
    }
}

// ============================================================================
// Read path
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed {0}")]
    Encoding(&'static str),
    #[error("row references a blob but no blob store is configured")]
    NoBlobStore,
    #[error("blob store: {0}")]
    Blob(#[from] BlobStoreError),
}

impl DecodeError {
    pub fn failure(&self) -> DecryptFailure {
        match self {
            DecodeError::Encoding(_) => DecryptFailure::CorruptEncoding,
            DecodeError::Blob(BlobStoreError::NotFound(_))
            | DecodeError::Blob(BlobStoreError::Corrupt(_))
            | DecodeError::Blob(BlobStoreError::InvalidLocator(_)) => {
                DecryptFailure::CorruptEncoding
            }
            DecodeError::Blob(_) | DecodeError::NoBlobStore => DecryptFailure::UnexpectedInternal,
        }
    }
}

#[derive(Deserialize)]
struct LegacyContainer {
    key: String,
    data: String,
    iv: String,
}

/// An envelope recovered from storage, ready to open.
#[derive(Debug)]
pub struct DecodedEnvelope {
    pub format: EnvelopeFormat,
    pub envelope: Envelope,
    /// The stored wrapped-key bytes taken verbatim, tried once if the
    /// base64-decoded key does not open. Some migrated rows hold the key
    /// without its base64 layer.
    raw_wrapped_key: Option<Vec<u8>>,
}

impl DecodedEnvelope {
    pub fn open(&self, key: &PrivateKey) -> CryptoResult<Vec<u8>> {
        let err = match open_envelope(&self.envelope, key) {
            Ok(plaintext) => return Ok(plaintext),
            Err(err) => err,
        };
        let Some(raw) = &self.raw_wrapped_key else {
            return Err(err);
        };
        if err != CryptoError::KeyMismatchOrCorrupt {
            return Err(err);
        }

        let retry = Envelope {
            wrapped_key: raw.clone(),
            ..self.envelope.clone()
        };
        match open_envelope(&retry, key) {
            Ok(plaintext) => {
                debug!("opened envelope using verbatim wrapped key");
                Ok(plaintext)
            }
            Err(_) => Err(err),
        }
    }
}

fn decode_b64(what: &'static str, text: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD
        .decode(text.trim())
        .map_err(|_| DecodeError::Encoding(what))
}

/// Reads the columns of a non-empty row back into an envelope, fetching the
/// ciphertext from `blobs` for external rows.
pub fn decode(
    columns: &EnvelopeColumns,
    blobs: Option<&dyn BlobStore>,
) -> Result<DecodedEnvelope, DecodeError> {
    let format = columns.detect();
    match format {
        EnvelopeFormat::LegacyInline => {
            let payload = columns
                .payload
                .as_deref()
                .ok_or(DecodeError::Encoding("payload"))?;
            let text = std::str::from_utf8(payload).map_err(|_| DecodeError::Encoding("payload"))?;
            let json = decode_b64("legacy container", text)?;
            let container: LegacyContainer = serde_json::from_slice(&json)
                .map_err(|_| DecodeError::Encoding("legacy container"))?;
            Ok(DecodedEnvelope {
                format,
                envelope: Envelope {
                    ciphertext: decode_b64("legacy data", &container.data)?,
                    wrapped_key: decode_b64("legacy key", &container.key)?,
                    iv: decode_b64("legacy iv", &container.iv)?,
                },
                raw_wrapped_key: None,
            })
        }
        EnvelopeFormat::SplitColumns => {
            let ciphertext = columns
                .payload
                .clone()
                .ok_or(DecodeError::Encoding("payload"))?;
            split_envelope(format, columns, ciphertext)
        }
        EnvelopeFormat::ExternalBlob => {
            let locator = columns
                .locator
                .as_deref()
                .ok_or(DecodeError::Encoding("locator"))?;
            let locator = BlobLocator::parse(locator)?;
            let blobs = blobs.ok_or(DecodeError::NoBlobStore)?;
            let ciphertext = blobs.get(&locator)?;
            split_envelope(format, columns, ciphertext)
        }
    }
}

fn split_envelope(
    format: EnvelopeFormat,
    columns: &EnvelopeColumns,
    ciphertext: Vec<u8>,
) -> Result<DecodedEnvelope, DecodeError> {
    let iv = columns
        .iv
        .as_deref()
        .filter(|iv| !iv.is_empty())
        .ok_or(DecodeError::Encoding("iv"))?;
    let iv = decode_b64("iv", iv)?;
    let stored_key = columns
        .wrapped_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or(DecodeError::Encoding("wrapped key"))?;

    let (wrapped_key, raw_wrapped_key) = match STANDARD.decode(stored_key.trim_ascii()) {
        Ok(decoded) => (decoded, Some(stored_key.to_vec())),
        Err(_) => (stored_key.to_vec(), None),
    };

    Ok(DecodedEnvelope {
        format,
        envelope: Envelope {
            ciphertext,
            wrapped_key,
            iv,
        },
        raw_wrapped_key,
    })
}
