use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use journal_blobstore::{BlobLocator, BlobStore, BlobStoreResult, DuckDbBlobStore};
use journal_crypto::{Envelope, seal_envelope};
use journal_storage::format;
use journal_storage::{
    DecryptFailure, EncryptedField, EnvelopeFormat, FieldAddress, FieldKind, FieldState,
    FieldValue, Journal, JournalConfig, LegacyRow, SealedStore, StorageError,
};
use journal_vault::{
    KeyVault, KeyVaultRecord, MemorySessionStore, RequestContext, SessionSecretHolder,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const PASSPHRASE: &str = "correct-horse";

/// Blob store that counts calls, backed by an in-memory DuckDB store.
struct CountingBlobStore {
    inner: DuckDbBlobStore,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingBlobStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DuckDbBlobStore::open_in_memory().unwrap(),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl BlobStore for CountingBlobStore {
    fn put(&self, data: &[u8]) -> BlobStoreResult<BlobLocator> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(data)
    }

    fn get(&self, locator: &BlobLocator) -> BlobStoreResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(locator)
    }

    fn delete(&self, locator: &BlobLocator) -> BlobStoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(locator)
    }

    fn exists(&self, locator: &BlobLocator) -> BlobStoreResult<bool> {
        self.inner.exists(locator)
    }
}

struct Harness {
    conn: Arc<Mutex<duckdb::Connection>>,
    vault: Arc<KeyVault>,
    secrets: SessionSecretHolder,
    store: SealedStore,
}

impl Harness {
    fn new(blobs: Option<Arc<dyn BlobStore>>) -> Self {
        let conn = Arc::new(Mutex::new(duckdb::Connection::open_in_memory().unwrap()));
        let vault = Arc::new(KeyVault::open_with_conn(conn.clone()).unwrap());
        let secrets =
            SessionSecretHolder::new(vault.clone(), Arc::new(MemorySessionStore::default()));
        let store = SealedStore::open_with_conn(conn.clone(), vault.clone(), blobs).unwrap();
        Self {
            conn,
            vault,
            secrets,
            store,
        }
    }

    fn with_key(blobs: Option<Arc<dyn BlobStore>>) -> (Self, KeyVaultRecord) {
        let harness = Self::new(blobs);
        let record = harness.vault.generate_and_store(PASSPHRASE).unwrap();
        (harness, record)
    }

    fn unlocked(&self) -> RequestContext {
        let mut ctx = self.secrets.begin_request(None).unwrap();
        self.secrets.unlock(&mut ctx, PASSPHRASE).unwrap();
        ctx
    }

    fn locked(&self) -> RequestContext {
        self.secrets.begin_request(None).unwrap()
    }

    fn save_text(&self, address: &FieldAddress, text: &str) -> EncryptedField {
        let mut field = self.store.load(address, FieldKind::Text).unwrap();
        field.set_text(text);
        self.store.save(&mut field).unwrap();
        field
    }

    fn read_text(&self, address: &FieldAddress, ctx: &RequestContext) -> FieldValue<String> {
        let field = self.store.load(address, FieldKind::Text).unwrap();
        self.store.get_text(&field, ctx)
    }
}

fn entry(id: &str) -> FieldAddress {
    FieldAddress::new("entries.content", id)
}

fn text_placeholder(failure: DecryptFailure) -> FieldValue<String> {
    FieldValue::Placeholder(failure.placeholder(FieldKind::Text).to_string())
}

fn legacy_row(envelope: &Envelope) -> LegacyRow {
    let container = serde_json::json!({
        "key": STANDARD.encode(&envelope.wrapped_key),
        "data": STANDARD.encode(&envelope.ciphertext),
        "iv": STANDARD.encode(&envelope.iv),
    });
    LegacyRow {
        content: Some(STANDARD.encode(container.to_string())),
        ..Default::default()
    }
}

fn split_row(envelope: &Envelope) -> LegacyRow {
    LegacyRow {
        content: Some(STANDARD.encode(&envelope.ciphertext)),
        encrypted_key: Some(STANDARD.encode(&envelope.wrapped_key).into_bytes()),
        initialization_vector: Some(STANDARD.encode(&envelope.iv)),
        blob_locator: None,
    }
}

// ── Round trips ──

#[test]
fn text_round_trip_in_split_columns() {
    let (h, record) = Harness::with_key(None);
    let address = entry("1");
    let text = "Dear diary, today was 晴れ ☀ and quiet.";

    let field = h.save_text(&address, text);
    assert_eq!(field.state(), FieldState::Encrypted(record.id));
    assert_eq!(field.columns().format, Some(EnvelopeFormat::SplitColumns));
    assert!(!field.is_dirty());

    let ctx = h.unlocked();
    assert_eq!(h.read_text(&address, &ctx), FieldValue::Value(text.to_string()));
}

#[test]
fn binary_round_trip_in_external_blob() {
    let blobs = CountingBlobStore::new();
    let (h, record) = Harness::with_key(Some(blobs.clone()));
    let address = FieldAddress::new("attachments.data", "photo-1");
    let data: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

    let mut field = h.store.load(&address, FieldKind::Binary).unwrap();
    field.set(&data);
    h.store.save(&mut field).unwrap();

    assert_eq!(field.columns().format, Some(EnvelopeFormat::ExternalBlob));
    assert!(field.columns().payload.is_none());
    assert!(field.columns().locator.is_some());

    let ctx = h.unlocked();
    let loaded = h.store.load(&address, FieldKind::Binary).unwrap();
    assert_eq!(loaded.state(), FieldState::Encrypted(record.id));
    assert_eq!(h.store.get(&loaded, &ctx), FieldValue::Value(data));
    assert_eq!(blobs.gets(), 1);
}

#[test]
fn single_byte_round_trip() {
    let (h, _) = Harness::with_key(None);
    let address = entry("tiny");
    h.save_text(&address, "x");
    assert_eq!(h.read_text(&address, &h.unlocked()), FieldValue::Value("x".into()));
}

#[test]
fn legacy_and_split_rows_decode_identically() {
    let (h, record) = Harness::with_key(None);
    let public = record.public_key().unwrap();
    let envelope = seal_envelope("written before the upgrade".as_bytes(), &public).unwrap();

    h.store
        .import_legacy(&entry("legacy"), record.id, legacy_row(&envelope))
        .unwrap();
    h.store
        .import_legacy(&entry("split"), record.id, split_row(&envelope))
        .unwrap();

    let legacy = h.store.load(&entry("legacy"), FieldKind::Text).unwrap();
    let split = h.store.load(&entry("split"), FieldKind::Text).unwrap();
    assert_eq!(legacy.columns().format, None);
    assert_eq!(legacy.columns().detect(), EnvelopeFormat::LegacyInline);
    assert_eq!(split.columns().detect(), EnvelopeFormat::SplitColumns);

    let ctx = h.unlocked();
    let expected = FieldValue::Value("written before the upgrade".to_string());
    assert_eq!(h.store.get_text(&legacy, &ctx), expected);
    assert_eq!(h.store.get_text(&split, &ctx), expected);
}

#[test]
fn resaving_an_imported_row_records_its_layout() {
    let (h, record) = Harness::with_key(None);
    let envelope = seal_envelope(b"old", &record.public_key().unwrap()).unwrap();
    h.store
        .import_legacy(&entry("1"), record.id, legacy_row(&envelope))
        .unwrap();

    let field = h.save_text(&entry("1"), "new");
    assert_eq!(field.columns().format, Some(EnvelopeFormat::SplitColumns));
    assert_eq!(h.read_text(&entry("1"), &h.unlocked()), FieldValue::Value("new".into()));
}

#[test]
fn split_import_with_non_base64_content_is_rejected() {
    let (h, record) = Harness::with_key(None);
    let envelope = seal_envelope(b"x", &record.public_key().unwrap()).unwrap();
    let mut row = split_row(&envelope);
    row.content = Some("not base64 at all!".into());

    let result = h.store.import_legacy(&entry("1"), record.id, row);
    assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    assert_eq!(h.store.count("entries.content").unwrap(), 0);
}

#[test]
fn raw_wrapped_key_from_migrated_row_opens() {
    let (h, record) = Harness::with_key(None);
    let envelope = seal_envelope("migrated with a raw key".as_bytes(), &record.public_key().unwrap())
        .unwrap();
    let mut row = split_row(&envelope);
    row.encrypted_key = Some(envelope.wrapped_key.clone());
    h.store.import_legacy(&entry("1"), record.id, row).unwrap();

    let field = h.store.load(&entry("1"), FieldKind::Text).unwrap();
    assert_eq!(field.columns().wrapped_key.as_deref(), Some(&envelope.wrapped_key[..]));
    assert_eq!(
        h.store.get_text(&field, &h.unlocked()),
        FieldValue::Value("migrated with a raw key".into())
    );
}

// ── Locked sessions ──

#[test]
fn locked_read_never_touches_ciphertext() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    let address = entry("secret");
    h.save_text(&address, "nobody may read this");

    let ctx = h.locked();
    assert!(!ctx.is_unlocked());
    assert_eq!(h.read_text(&address, &ctx), text_placeholder(DecryptFailure::KeyUnavailable));
    assert_eq!(blobs.gets(), 0);
}

#[test]
fn locked_read_of_binary_field_uses_data_placeholder() {
    let (h, _) = Harness::with_key(None);
    let address = FieldAddress::new("attachments.data", "a");
    let mut field = h.store.load(&address, FieldKind::Binary).unwrap();
    field.set(&[1, 2, 3]);
    h.store.save(&mut field).unwrap();

    assert_eq!(
        h.store.get(&field, &h.locked()),
        FieldValue::Placeholder("[Data Encrypted - Key Unavailable]".into())
    );
}

#[test]
fn locked_read_reports_key_unavailable_even_for_garbage() {
    let (h, record) = Harness::with_key(None);
    let row = LegacyRow {
        content: Some("%%% definitely not a container".into()),
        ..Default::default()
    };
    h.store.import_legacy(&entry("1"), record.id, row).unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.locked()),
        text_placeholder(DecryptFailure::KeyUnavailable)
    );
    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        text_placeholder(DecryptFailure::CorruptEncoding)
    );
}

#[test]
fn lock_then_read_is_unavailable() {
    let (h, _) = Harness::with_key(None);
    h.save_text(&entry("1"), "before lock");

    let mut ctx = h.unlocked();
    assert_eq!(h.read_text(&entry("1"), &ctx), FieldValue::Value("before lock".into()));

    h.secrets.lock(&mut ctx).unwrap();
    assert_eq!(
        h.read_text(&entry("1"), &ctx),
        text_placeholder(DecryptFailure::KeyUnavailable)
    );
}

// ── Corruption ──

#[test]
fn malformed_iv_is_invalid_encoding() {
    let (h, record) = Harness::with_key(None);
    let envelope = seal_envelope(b"payload", &record.public_key().unwrap()).unwrap();
    let mut row = split_row(&envelope);
    row.initialization_vector = Some("@@not-base64@@".into());
    h.store.import_legacy(&entry("1"), record.id, row).unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        text_placeholder(DecryptFailure::CorruptEncoding)
    );
}

#[test]
fn garbage_wrapped_key_is_rsa_error() {
    let (h, record) = Harness::with_key(None);
    let envelope = seal_envelope(b"payload", &record.public_key().unwrap()).unwrap();
    let mut row = split_row(&envelope);
    row.encrypted_key = Some(STANDARD.encode([0u8; 256]).into_bytes());
    h.store.import_legacy(&entry("1"), record.id, row).unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        text_placeholder(DecryptFailure::KeyMismatchOrCorrupt)
    );
}

#[test]
fn tampered_ciphertext_is_aes_error() {
    let (h, record) = Harness::with_key(None);
    let mut envelope = seal_envelope(b"0123456789abcdef", &record.public_key().unwrap()).unwrap();
    envelope.ciphertext[15] ^= 0xFF;
    h.store
        .import_legacy(&entry("1"), record.id, split_row(&envelope))
        .unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        text_placeholder(DecryptFailure::CipherOrPadding)
    );
}

#[test]
fn tampered_row_in_database_is_aes_error() {
    let (h, _) = Harness::with_key(None);
    h.save_text(&entry("1"), "0123456789abcdef");

    {
        let conn = h.conn.lock().unwrap();
        let mut payload: Vec<u8> = conn
            .query_row(
                "SELECT payload FROM sealed_fields WHERE record_id = '1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        payload[15] ^= 0xFF;
        conn.execute(
            "UPDATE sealed_fields SET payload = ? WHERE record_id = '1'",
            duckdb::params![payload],
        )
        .unwrap();
    }

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        text_placeholder(DecryptFailure::CipherOrPadding)
    );
}

#[test]
fn missing_blob_is_invalid_encoding() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    let field = h.save_text(&entry("1"), "attachment body");

    let locator = BlobLocator::parse(field.columns().locator.as_deref().unwrap()).unwrap();
    blobs.inner.delete(&locator).unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        text_placeholder(DecryptFailure::CorruptEncoding)
    );
}

#[test]
fn binary_content_in_text_field_is_invalid_encoding() {
    let (h, _) = Harness::with_key(None);
    let mut field = h.store.load(&entry("1"), FieldKind::Text).unwrap();
    field.set(&[0xff, 0xfe, 0xfd]);
    h.store.save(&mut field).unwrap();

    assert_eq!(
        h.store.get_text(&field, &h.unlocked()),
        text_placeholder(DecryptFailure::CorruptEncoding)
    );
}

#[test]
fn unknown_layout_tag_fails_to_load() {
    let (h, _) = Harness::with_key(None);
    h.save_text(&entry("1"), "x");
    h.conn
        .lock()
        .unwrap()
        .execute("UPDATE sealed_fields SET format = 'v9'", [])
        .unwrap();

    assert!(matches!(
        h.store.load(&entry("1"), FieldKind::Text),
        Err(StorageError::Storage(_))
    ));
}

// ── Key binding ──

#[test]
fn binding_survives_key_rotation() {
    let (h, k1) = Harness::with_key(None);
    let address = entry("1");
    h.save_text(&address, "sealed under the first key");

    let k2 = h.vault.generate_and_store(PASSPHRASE).unwrap();
    assert_eq!(h.vault.active_key().unwrap().unwrap().id, k2.id);

    // Unlocking picks the newest key. Decryption is attempted with it even
    // though the field is bound to the first one.
    let ctx = h.unlocked();
    let field = h.store.load(&address, FieldKind::Text).unwrap();
    assert_eq!(field.key_id(), Some(k1.id));
    assert_eq!(
        h.store.get_text(&field, &ctx),
        text_placeholder(DecryptFailure::KeyMismatchOrCorrupt)
    );

    // Re-saving keeps sealing under the bound key.
    let resaved = h.save_text(&address, "still the first key");
    assert_eq!(resaved.key_id(), Some(k1.id));

    let k1_private = h.vault.unwrap_private_key(&k1, PASSPHRASE).unwrap();
    let decoded = format::decode(resaved.columns(), None).unwrap();
    assert_eq!(decoded.open(&k1_private).unwrap(), b"still the first key");
}

#[test]
fn new_fields_bind_to_newest_key() {
    let (h, _) = Harness::with_key(None);
    let k2 = h.vault.generate_and_store(PASSPHRASE).unwrap();

    let field = h.save_text(&entry("fresh"), "hello");
    assert_eq!(field.key_id(), Some(k2.id));
    assert_eq!(h.read_text(&entry("fresh"), &h.unlocked()), FieldValue::Value("hello".into()));
}

#[test]
fn save_without_any_key_fails_and_writes_nothing() {
    let h = Harness::new(None);
    let mut field = h.store.load(&entry("1"), FieldKind::Text).unwrap();
    field.set_text("nowhere to go");

    assert!(matches!(h.store.save(&mut field), Err(StorageError::MissingKey)));
    assert_eq!(field.state(), FieldState::PendingPlaintext);
    assert_eq!(field.key_id(), None);
    assert_eq!(h.store.count("entries.content").unwrap(), 0);
}

// ── Edits ──

#[test]
fn clear_keeps_binding_and_empties_value() {
    let (h, record) = Harness::with_key(None);
    let mut field = h.save_text(&entry("1"), "to be removed");

    field.clear();
    assert!(field.is_dirty());
    h.store.save(&mut field).unwrap();
    assert_eq!(field.state(), FieldState::Empty);
    assert_eq!(field.key_id(), Some(record.id));

    let reloaded = h.store.load(&entry("1"), FieldKind::Text).unwrap();
    assert_eq!(reloaded.state(), FieldState::Empty);
    assert_eq!(reloaded.key_id(), Some(record.id));
    assert_eq!(h.store.get_text(&reloaded, &h.unlocked()), FieldValue::Empty);
}

#[test]
fn setting_empty_value_clears() {
    let (h, _) = Harness::with_key(None);
    let mut field = h.save_text(&entry("1"), "something");
    field.set_text("");
    h.store.save(&mut field).unwrap();
    assert!(h.read_text(&entry("1"), &h.unlocked()).is_empty());
}

#[test]
fn submitted_placeholder_does_not_replace_content() {
    let (h, _) = Harness::with_key(None);
    let mut field = h.save_text(&entry("1"), "the real entry");

    field.set_text("[Content Encrypted - Key Unavailable]");
    assert!(!field.is_dirty());
    h.store.save(&mut field).unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        FieldValue::Value("the real entry".into())
    );
}

#[test]
fn text_resembling_a_placeholder_is_saved() {
    let (h, _) = Harness::with_key(None);
    let mut field = h.save_text(&entry("1"), "the real entry");

    field.set_text("[Content warning] rough day");
    assert!(field.is_dirty());
    h.store.save(&mut field).unwrap();

    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        FieldValue::Value("[Content warning] rough day".into())
    );
}

#[test]
fn stored_placeholder_is_returned_verbatim() {
    let (h, record) = Harness::with_key(None);
    for (id, text) in [
        ("1", "[Content Decryption Failed - AES Error]"),
        ("2", "[Content Unavailable]"),
    ] {
        let row = LegacyRow {
            content: Some(text.into()),
            ..Default::default()
        };
        h.store.import_legacy(&entry(id), record.id, row).unwrap();
        assert_eq!(
            h.read_text(&entry(id), &h.unlocked()),
            FieldValue::Placeholder(text.into())
        );
    }
}

#[test]
fn stage_writes_nothing_until_commit() {
    let (h, record) = Harness::with_key(None);
    let mut field = EncryptedField::new(entry("1"), FieldKind::Text);
    field.set_text("two steps");

    let write = h.store.stage(&field).unwrap();
    assert_eq!(write.key_id(), Some(record.id));
    assert_eq!(write.format(), Some(EnvelopeFormat::SplitColumns));
    assert_eq!(h.store.count("entries.content").unwrap(), 0);
    assert_eq!(field.state(), FieldState::PendingPlaintext);

    h.store.commit(&mut field, write).unwrap();
    assert_eq!(h.store.count("entries.content").unwrap(), 1);
    assert_eq!(field.state(), FieldState::Encrypted(record.id));
}

#[test]
fn commit_to_another_field_is_rejected() {
    let (h, _) = Harness::with_key(None);
    let mut a = EncryptedField::new(entry("a"), FieldKind::Text);
    a.set_text("for a");
    let mut b = EncryptedField::new(entry("b"), FieldKind::Text);

    let write = h.store.stage(&a).unwrap();
    assert!(matches!(
        h.store.commit(&mut b, write),
        Err(StorageError::InvalidInput(_))
    ));
    assert_eq!(h.store.count("entries.content").unwrap(), 0);
}

// ── Blob lifecycle ──

#[test]
fn overwrite_removes_superseded_blob() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));

    let first = h.save_text(&entry("1"), "version one");
    let old = BlobLocator::parse(first.columns().locator.as_deref().unwrap()).unwrap();

    let second = h.save_text(&entry("1"), "version two");
    let new = BlobLocator::parse(second.columns().locator.as_deref().unwrap()).unwrap();

    assert_ne!(old, new);
    assert!(!blobs.exists(&old).unwrap());
    assert!(blobs.exists(&new).unwrap());
    assert_eq!(h.read_text(&entry("1"), &h.unlocked()), FieldValue::Value("version two".into()));
}

#[test]
fn fresh_field_overwrite_removes_stored_blob() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    let first = h.save_text(&entry("1"), "version one");
    let old = BlobLocator::parse(first.columns().locator.as_deref().unwrap()).unwrap();

    let mut fresh = EncryptedField::new(entry("1"), FieldKind::Text);
    fresh.set_text("written without loading");
    h.store.save(&mut fresh).unwrap();

    assert!(!blobs.exists(&old).unwrap());
    assert_eq!(
        h.read_text(&entry("1"), &h.unlocked()),
        FieldValue::Value("written without loading".into())
    );
}

#[test]
fn failed_locator_lookup_aborts_commit_before_blob_write() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    let mut field = EncryptedField::new(entry("1"), FieldKind::Text);
    field.set_text("never stored");
    let write = h.store.stage(&field).unwrap();

    let conn = h.conn.clone();
    std::thread::spawn(move || {
        let _guard = conn.lock().unwrap();
        panic!("poison the connection lock");
    })
    .join()
    .unwrap_err();

    assert!(matches!(
        h.store.commit(&mut field, write),
        Err(StorageError::Storage(_))
    ));
    assert_eq!(blobs.puts.load(Ordering::SeqCst), 0);
    assert_eq!(field.state(), FieldState::PendingPlaintext);
}

#[test]
fn malformed_stored_locator_does_not_block_delete() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    h.save_text(&entry("1"), "soon gone");
    h.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE sealed_fields SET locator = 'not a locator' WHERE record_id = '1'",
            [],
        )
        .unwrap();

    assert!(h.store.delete(&entry("1")).unwrap());
    assert_eq!(blobs.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.count("entries.content").unwrap(), 0);
}

#[test]
fn clearing_external_field_removes_blob() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    let mut field = h.save_text(&entry("1"), "temporary");
    let locator = BlobLocator::parse(field.columns().locator.as_deref().unwrap()).unwrap();

    field.clear();
    h.store.save(&mut field).unwrap();
    assert!(!blobs.exists(&locator).unwrap());
}

#[test]
fn delete_removes_row_and_blob() {
    let blobs = CountingBlobStore::new();
    let (h, _) = Harness::with_key(Some(blobs.clone()));
    let field = h.save_text(&entry("1"), "short lived");
    let locator = BlobLocator::parse(field.columns().locator.as_deref().unwrap()).unwrap();

    assert!(h.store.delete(&entry("1")).unwrap());
    assert!(!blobs.exists(&locator).unwrap());
    assert_eq!(blobs.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.load(&entry("1"), FieldKind::Text).unwrap().state(), FieldState::Empty);
    assert!(!h.store.delete(&entry("1")).unwrap());
}

// ── Journal ──

#[test]
fn journal_persists_fields_and_sessions_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = JournalConfig {
        db_path: dir.path().join("journal.duckdb"),
        blob_root: Some(dir.path().join("blobs")),
        ..JournalConfig::default()
    };
    let address = entry("persisted");

    let session_id = {
        let journal = Journal::open(config.clone()).unwrap();
        journal.vault().generate_and_store(PASSPHRASE).unwrap();

        let mut ctx = journal.begin_request(None).unwrap();
        journal.unlock(&mut ctx, PASSPHRASE).unwrap();

        let mut field = journal.field(&address, FieldKind::Text).unwrap();
        field.set_text("survives a restart");
        journal.save(&mut field).unwrap();
        assert_eq!(field.columns().format, Some(EnvelopeFormat::ExternalBlob));
        ctx.session_id().clone()
    };

    let journal = Journal::open(config).unwrap();
    let ctx = journal.begin_request(Some(session_id)).unwrap();
    assert!(ctx.is_unlocked());
    assert_eq!(
        journal.read_text(&address, &ctx).unwrap(),
        FieldValue::Value("survives a restart".into())
    );
}

#[test]
fn journal_keeps_blobs_in_its_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = JournalConfig {
        db_path: dir.path().join("journal.duckdb"),
        blobs_in_database: true,
        ..JournalConfig::default()
    };
    let address = FieldAddress::new("attachments.data", "scan-1");
    let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 253) as u8).collect();

    let session_id = {
        let journal = Journal::open(config.clone()).unwrap();
        journal.vault().generate_and_store(PASSPHRASE).unwrap();
        let mut ctx = journal.begin_request(None).unwrap();
        journal.unlock(&mut ctx, PASSPHRASE).unwrap();

        let mut field = journal.field(&address, FieldKind::Binary).unwrap();
        field.set(&data);
        journal.save(&mut field).unwrap();
        assert_eq!(field.columns().format, Some(EnvelopeFormat::ExternalBlob));
        assert!(field.columns().payload.is_none());
        ctx.session_id().clone()
    };

    let journal = Journal::open(config).unwrap();
    let ctx = journal.begin_request(Some(session_id)).unwrap();
    let field = journal.field(&address, FieldKind::Binary).unwrap();
    assert_eq!(journal.store().get(&field, &ctx), FieldValue::Value(data));
}

#[test]
fn in_memory_journal_unlock_with_wrong_passphrase_fails() {
    let journal = Journal::open_in_memory().unwrap();
    journal.vault().generate_and_store(PASSPHRASE).unwrap();

    let mut ctx = journal.begin_request(None).unwrap();
    let err = journal.unlock(&mut ctx, "wrong-password").unwrap_err();
    assert!(matches!(err, StorageError::Vault(e) if e.is_invalid_password()));
    assert!(!ctx.is_unlocked());
}

#[test]
fn journal_unlock_without_key_is_missing_key() {
    let journal = Journal::open_in_memory().unwrap();
    let mut ctx = journal.begin_request(None).unwrap();
    assert!(matches!(
        journal.unlock(&mut ctx, PASSPHRASE),
        Err(StorageError::MissingKey)
    ));
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::LazyLock;

    static SHARED: LazyLock<(Harness, RequestContext)> = LazyLock::new(|| {
        let (h, _) = Harness::with_key(None);
        let ctx = h.unlocked();
        (h, ctx)
    });

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn saved_text_reads_back(id in "[a-z0-9]{1,12}", text in "\\PC{1,200}") {
            prop_assume!(!FieldKind::Text.is_placeholder(text.as_bytes()));
            let (h, ctx) = &*SHARED;
            let address = FieldAddress::new("entries.proptest", id);
            h.save_text(&address, &text);
            prop_assert_eq!(h.read_text(&address, ctx), FieldValue::Value(text));
        }
    }
}
