//! Session-scoped custody of the unwrapped private key.
//!
//! The unwrapped key lives in exactly two places: the session store entry
//! for the user's session, and the [`RequestContext`] built for each
//! request. Nothing global holds it. Code that needs to decrypt receives
//! the context explicitly.

use std::fmt;
use std::sync::Arc;

use journal_crypto::{PrivateKey, parse_private_key, private_key_to_pem};
use tracing::{info, warn};

use crate::error::{VaultError, VaultResult};
use crate::key_vault::KeyVault;
use crate::session::{SessionData, SessionId, SessionStore};

/// Session entry holding the PKCS#1 PEM of the unwrapped key.
pub const PRIVATE_KEY_ENTRY: &str = "private_key";

/// One-shot marker left by [`SessionSecretHolder::lock`].
pub const JUST_LOCKED_ENTRY: &str = "just_locked";

/// Per-request view of the session.
///
/// Dropped at the end of the request; the mirrored key is wiped with it.
pub struct RequestContext {
    session_id: SessionId,
    private_key: Option<PrivateKey>,
    just_locked: bool,
}

impl RequestContext {
    /// A context with a fresh session and no key.
    pub fn locked() -> Self {
        Self {
            session_id: SessionId::new(),
            private_key: None,
            just_locked: false,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_unlocked(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    /// True for the first request after a lock, so the caller can show a
    /// confirmation once.
    pub fn just_locked(&self) -> bool {
        self.just_locked
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id)
            .field("unlocked", &self.is_unlocked())
            .field("just_locked", &self.just_locked)
            .finish()
    }
}

/// Unlocks and locks sessions against the active key.
pub struct SessionSecretHolder {
    vault: Arc<KeyVault>,
    sessions: Arc<dyn SessionStore>,
}

impl SessionSecretHolder {
    pub fn new(vault: Arc<KeyVault>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { vault, sessions }
    }

    pub fn vault(&self) -> &Arc<KeyVault> {
        &self.vault
    }

    /// Builds the context for one request. A missing id starts a new
    /// session. Consumes the just-locked marker if present.
    pub fn begin_request(&self, session_id: Option<SessionId>) -> VaultResult<RequestContext> {
        let session_id = session_id.unwrap_or_default();
        let Some(mut data) = self.sessions.load(&session_id)? else {
            return Ok(RequestContext {
                session_id,
                private_key: None,
                just_locked: false,
            });
        };

        let just_locked = data.remove(JUST_LOCKED_ENTRY);
        let mut dirty = just_locked;

        let parsed = data.get(PRIVATE_KEY_ENTRY).map(parse_private_key);
        let private_key = match parsed {
            None => None,
            Some(Ok(key)) => Some(key),
            Some(Err(e)) => {
                warn!(session = ?session_id, error = %e, "discarding unreadable session key");
                data.remove(PRIVATE_KEY_ENTRY);
                dirty = true;
                None
            }
        };

        if dirty {
            self.sessions.save(&session_id, &data)?;
        }

        Ok(RequestContext {
            session_id,
            private_key,
            just_locked,
        })
    }

    /// Unwraps the active key with `passphrase` and keeps it for the rest
    /// of the session.
    ///
    /// Fails with `MissingKey` when no key has been generated yet. Passphrase
    /// failures are returned as the vault reported them.
    pub fn unlock(&self, ctx: &mut RequestContext, passphrase: &str) -> VaultResult<()> {
        let record = self.vault.active_key()?.ok_or(VaultError::MissingKey)?;
        let key = self.vault.unwrap_private_key(&record, passphrase)?;
        let pem = private_key_to_pem(&key)?;

        let mut data = self.sessions.load(&ctx.session_id)?.unwrap_or_default();
        data.insert(PRIVATE_KEY_ENTRY, pem.as_str());
        self.sessions.save(&ctx.session_id, &data)?;

        ctx.private_key = Some(key);
        info!(key_id = %record.id, "session unlocked");
        Ok(())
    }

    /// Forgets the key and moves the session to a new id.
    pub fn lock(&self, ctx: &mut RequestContext) -> VaultResult<()> {
        let mut data = self
            .sessions
            .load(&ctx.session_id)?
            .unwrap_or_else(SessionData::default);
        data.remove(PRIVATE_KEY_ENTRY);
        data.insert(JUST_LOCKED_ENTRY, "1");

        let new_id = SessionId::new();
        self.sessions.destroy(&ctx.session_id)?;
        self.sessions.save(&new_id, &data)?;

        ctx.session_id = new_id;
        ctx.private_key = None;
        info!("session locked");
        Ok(())
    }

    pub fn is_unlocked(&self, ctx: &RequestContext) -> bool {
        ctx.is_unlocked()
    }
}
