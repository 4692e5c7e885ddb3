//! Key vault and session key custody.
//!
//! The vault stores RSA keypairs with the private half wrapped under a
//! passphrase. Unlocking a session unwraps the newest key and keeps it in
//! the session store until the session is locked or expires.

mod error;
mod export;
mod key_vault;
mod secret_holder;
pub mod session;

pub use error::{VaultError, VaultResult};
pub use export::{KeyExport, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use key_vault::{KeyId, KeyVault, KeyVaultRecord, WrappedPrivateKey};
pub use secret_holder::{JUST_LOCKED_ENTRY, PRIVATE_KEY_ENTRY, RequestContext, SessionSecretHolder};
pub use session::{
    DEFAULT_IDLE_TIMEOUT, DuckDbSessionStore, MemorySessionStore, SessionConfig, SessionData,
    SessionId, SessionStore,
};
