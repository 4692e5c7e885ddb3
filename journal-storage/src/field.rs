//! A single encrypted attribute of a record.
//!
//! Values are held in memory as pending plaintext until the field is saved
//! through a [`SealedStore`](crate::SealedStore), which seals them under the
//! field's bound key. Reads never fail: anything that prevents decryption
//! yields a placeholder string instead.

use std::fmt;

use journal_blobstore::{BlobLocator, BlobStore};
use journal_vault::{KeyId, RequestContext};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::format::{self, EnvelopeColumns};
use crate::sentinel::{DecryptFailure, FieldKind};

/// Which record attribute a field belongs to, e.g. `entries.content/<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldAddress {
    pub namespace: String,
    pub record_id: String,
}

impl FieldAddress {
    pub fn new(namespace: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            record_id: record_id.into(),
        }
    }
}

impl fmt::Display for FieldAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.record_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldState {
    Empty,
    /// A value has been set but not yet sealed and saved.
    PendingPlaintext,
    /// Sealed under the given key.
    Encrypted(KeyId),
}

/// Result of reading a field.
#[derive(Clone, PartialEq, Eq)]
pub enum FieldValue<T> {
    Empty,
    Value(T),
    /// Shown in place of content that could not be decrypted.
    Placeholder(String),
}

impl<T> FieldValue<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn placeholder(&self) -> Option<&str> {
        match self {
            FieldValue::Placeholder(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }
}

impl FieldValue<String> {
    /// Text to display: the content, the placeholder, or nothing.
    pub fn display_text(&self) -> &str {
        match self {
            FieldValue::Empty => "",
            FieldValue::Value(s) | FieldValue::Placeholder(s) => s,
        }
    }
}

impl<T> fmt::Debug for FieldValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Empty => f.write_str("Empty"),
            FieldValue::Value(_) => f.write_str("Value(..)"),
            FieldValue::Placeholder(p) => f.debug_tuple("Placeholder").field(p).finish(),
        }
    }
}

/// One encrypted attribute plus its in-memory edits.
pub struct EncryptedField {
    address: FieldAddress,
    kind: FieldKind,
    key_id: Option<KeyId>,
    columns: EnvelopeColumns,
    pending: Option<Zeroizing<Vec<u8>>>,
    cleared: bool,
}

impl EncryptedField {
    /// A field with nothing stored.
    pub fn new(address: FieldAddress, kind: FieldKind) -> Self {
        Self {
            address,
            kind,
            key_id: None,
            columns: EnvelopeColumns::default(),
            pending: None,
            cleared: false,
        }
    }

    pub(crate) fn from_stored(
        address: FieldAddress,
        kind: FieldKind,
        key_id: Option<KeyId>,
        columns: EnvelopeColumns,
    ) -> Self {
        Self {
            address,
            kind,
            key_id,
            columns,
            pending: None,
            cleared: false,
        }
    }

    pub fn address(&self) -> &FieldAddress {
        &self.address
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// The key this field is sealed under. Fixed by the first save and
    /// kept even when the value is cleared.
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    pub fn columns(&self) -> &EnvelopeColumns {
        &self.columns
    }

    pub fn state(&self) -> FieldState {
        if self.pending.is_some() {
            return FieldState::PendingPlaintext;
        }
        match self.key_id {
            Some(key_id) if !self.columns.is_empty() => FieldState::Encrypted(key_id),
            _ => FieldState::Empty,
        }
    }

    /// Whether the field has edits that a save would write.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some() || self.cleared
    }

    /// Sets a new value, sealed on the next save.
    ///
    /// An empty value clears the field. A value equal to one of this
    /// kind's placeholders is ignored, so a placeholder that was displayed
    /// and submitted back never replaces the real content.
    pub fn set(&mut self, value: &[u8]) {
        if value.is_empty() {
            self.clear();
            return;
        }
        if self.kind.is_placeholder(value) {
            debug!(field = %self.address, "ignoring placeholder value");
            return;
        }
        self.pending = Some(Zeroizing::new(value.to_vec()));
    }

    pub fn set_text(&mut self, value: &str) {
        self.set(value.as_bytes());
    }

    /// Removes the stored value. The key binding is kept.
    pub fn clear(&mut self) {
        self.pending = None;
        if !self.columns.is_empty() {
            self.columns = EnvelopeColumns::default();
            self.cleared = true;
        }
    }

    pub(crate) fn pending(&self) -> Option<&[u8]> {
        self.pending.as_deref().map(Vec::as_slice)
    }

    pub(crate) fn apply_commit(&mut self, key_id: Option<KeyId>, columns: EnvelopeColumns) {
        self.key_id = key_id;
        self.columns = columns;
        self.pending = None;
        self.cleared = false;
    }

    pub(crate) fn current_locator(&self) -> Option<BlobLocator> {
        self.columns
            .locator
            .as_deref()
            .and_then(|l| BlobLocator::parse(l).ok())
    }

    /// Decrypts the stored value with the key held by `ctx`.
    ///
    /// Nothing is decoded or fetched while `ctx` is locked.
    pub fn get(&self, ctx: &RequestContext, blobs: Option<&dyn BlobStore>) -> FieldValue<Vec<u8>> {
        if self.columns.is_empty() {
            return FieldValue::Empty;
        }
        if let Some(text) = self.stored_placeholder() {
            return FieldValue::Placeholder(text);
        }
        let Some(key) = ctx.private_key() else {
            return self.failed(DecryptFailure::KeyUnavailable);
        };

        let decoded = match format::decode(&self.columns, blobs) {
            Ok(decoded) => decoded,
            Err(e) => {
                let failure = e.failure();
                if failure == DecryptFailure::UnexpectedInternal {
                    error!(field = %self.address, error = %e, "failed to load envelope");
                } else {
                    warn!(field = %self.address, error = %e, "failed to decode envelope");
                }
                return self.failed(failure);
            }
        };

        match decoded.open(key) {
            Ok(plaintext) => FieldValue::Value(plaintext),
            Err(e) => {
                warn!(
                    field = %self.address,
                    format = decoded.format.as_tag(),
                    error = %e,
                    "decryption failed"
                );
                self.failed(DecryptFailure::from(&e))
            }
        }
    }

    /// Like [`get`](Self::get), decoding the plaintext as UTF-8.
    pub fn get_text(
        &self,
        ctx: &RequestContext,
        blobs: Option<&dyn BlobStore>,
    ) -> FieldValue<String> {
        match self.get(ctx, blobs) {
            FieldValue::Empty => FieldValue::Empty,
            FieldValue::Placeholder(p) => FieldValue::Placeholder(p),
            FieldValue::Value(bytes) => match String::from_utf8(bytes) {
                Ok(text) => FieldValue::Value(text),
                Err(e) => {
                    drop(Zeroizing::new(e.into_bytes()));
                    warn!(field = %self.address, "decrypted text is not valid UTF-8");
                    FieldValue::Placeholder(
                        DecryptFailure::CorruptEncoding.placeholder(self.kind).to_string(),
                    )
                }
            },
        }
    }

    fn stored_placeholder(&self) -> Option<String> {
        let payload = self.columns.bare_payload()?;
        if self.kind.is_stored_placeholder(payload) {
            String::from_utf8(payload.to_vec()).ok()
        } else {
            None
        }
    }

    fn failed<T>(&self, failure: DecryptFailure) -> FieldValue<T> {
        FieldValue::Placeholder(failure.placeholder(self.kind).to_string())
    }
}

impl fmt::Debug for EncryptedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedField")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
