//! Journal configuration.

use journal_vault::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Path that opens the database in memory instead of on disk.
pub const IN_MEMORY_DB: &str = ":memory:";

/// One year.
pub const MAX_SESSION_IDLE_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// DuckDB file holding keys, sessions and sealed fields.
    pub db_path: PathBuf,
    /// Directory for external ciphertext. New fields are written as
    /// external blobs when this is set, as split columns otherwise.
    pub blob_root: Option<PathBuf>,
    /// Store external ciphertext in the journal database itself. Mutually
    /// exclusive with `blob_root`.
    pub blobs_in_database: bool,
    pub session_idle_timeout_secs: u64,
    /// DuckDB `memory_limit` pragma.
    pub memory_limit: String,
    /// DuckDB `threads` pragma.
    pub threads: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("journal.duckdb"),
            blob_root: None,
            blobs_in_database: false,
            session_idle_timeout_secs: 12 * 60 * 60,
            memory_limit: "256MB".to_string(),
            threads: 2,
        }
    }
}

impl JournalConfig {
    /// Reads a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))
    }

    pub fn in_memory() -> Self {
        Self {
            db_path: PathBuf::from(IN_MEMORY_DB),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path.as_os_str() == IN_MEMORY_DB
    }

    /// Whether new fields are written as external blobs.
    pub fn uses_external_blobs(&self) -> bool {
        self.blob_root.is_some() || self.blobs_in_database
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.session_idle_timeout_secs == 0 {
            return Err(StorageError::Config(
                "session_idle_timeout_secs must be positive".into(),
            ));
        }
        if self.session_idle_timeout_secs > MAX_SESSION_IDLE_TIMEOUT_SECS {
            return Err(StorageError::Config(format!(
                "session_idle_timeout_secs must not exceed {MAX_SESSION_IDLE_TIMEOUT_SECS}"
            )));
        }
        if self.blob_root.is_some() && self.blobs_in_database {
            return Err(StorageError::Config(
                "blob_root and blobs_in_database are mutually exclusive".into(),
            ));
        }
        if self.threads == 0 {
            return Err(StorageError::Config("threads must be positive".into()));
        }
        if self.memory_limit.trim().is_empty() || self.memory_limit.contains('\'') {
            return Err(StorageError::Config(format!(
                "invalid memory_limit {:?}",
                self.memory_limit
            )));
        }
        Ok(())
    }
}
