//! Key export for backup.
//!
//! The private key leaves the vault only in its wrapped form; restoring it
//! still requires the passphrase.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::VaultResult;
use crate::key_vault::{KeyId, KeyVaultRecord};

pub const PUBLIC_KEY_FILE: &str = "public_key.pem";
pub const PRIVATE_KEY_FILE: &str = "private_key.enc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExport {
    pub key_id: KeyId,
    pub public_key_pem: String,
    pub wrapped_private_key: String,
}

impl KeyExport {
    pub fn from_record(record: &KeyVaultRecord) -> Self {
        Self {
            key_id: record.id,
            public_key_pem: record.public_key_pem.clone(),
            wrapped_private_key: record.wrapped_private_key.as_str().to_string(),
        }
    }

    /// Writes `public_key.pem` and `private_key.enc` into `dir`, creating it
    /// if needed. Returns the two paths written.
    pub fn write_to(&self, dir: &Path) -> VaultResult<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)?;
        let public_path = dir.join(PUBLIC_KEY_FILE);
        let private_path = dir.join(PRIVATE_KEY_FILE);
        fs::write(&public_path, &self.public_key_pem)?;
        fs::write(&private_path, &self.wrapped_private_key)?;
        tracing::info!(key_id = %self.key_id, dir = %dir.display(), "exported key");
        Ok((public_path, private_path))
    }
}
