//! Server-side session storage with inactivity expiry.

use chrono::Utc;
use duckdb::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::{VaultError, VaultResult};

/// Sessions idle longer than this are discarded.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    fn is_expired(&self, updated_at_ms: i64, now_ms: i64) -> bool {
        let idle = now_ms.saturating_sub(updated_at_ms).max(0) as u128;
        idle >= self.idle_timeout.as_millis()
    }
}

/// Opaque session identifier handed to the client.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// Session ids are bearer tokens; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionId({prefix}…)")
    }
}

/// String entries kept for one session. Values are wiped on drop.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData {
    entries: BTreeMap<String, String>,
}

impl SessionData {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(mut old) = self.entries.insert(key.into(), value.into()) {
            old.zeroize();
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(mut old) => {
                old.zeroize();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for SessionData {
    fn drop(&mut self) {
        for value in self.entries.values_mut() {
            value.zeroize();
        }
    }
}

impl fmt::Debug for SessionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Backend for session data.
///
/// `load` returns `None` for unknown or expired sessions and counts as
/// activity, pushing the expiry out.
pub trait SessionStore: Send + Sync {
    fn load(&self, id: &SessionId) -> VaultResult<Option<SessionData>>;
    fn save(&self, id: &SessionId, data: &SessionData) -> VaultResult<()>;
    fn destroy(&self, id: &SessionId) -> VaultResult<()>;
    /// Removes all expired sessions, returning how many were dropped.
    fn purge_expired(&self) -> VaultResult<usize>;
}

// ============================================================================
// MemorySessionStore
// ============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, (SessionData, i64)>>,
}

impl MemorySessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &SessionId) -> VaultResult<Option<SessionData>> {
        let now = Utc::now().timestamp_millis();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))?;

        let expired = match sessions.get_mut(id) {
            None => return Ok(None),
            Some((_, updated_at)) if self.config.is_expired(*updated_at, now) => true,
            Some((data, updated_at)) => {
                *updated_at = now;
                return Ok(Some(data.clone()));
            }
        };
        if expired {
            sessions.remove(id);
            debug!(session = ?id, "session expired");
        }
        Ok(None)
    }

    fn save(&self, id: &SessionId, data: &SessionData) -> VaultResult<()> {
        let now = Utc::now().timestamp_millis();
        self.sessions
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))?
            .insert(id.clone(), (data.clone(), now));
        Ok(())
    }

    fn destroy(&self, id: &SessionId) -> VaultResult<()> {
        self.sessions
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))?
            .remove(id);
        Ok(())
    }

    fn purge_expired(&self) -> VaultResult<usize> {
        let now = Utc::now().timestamp_millis();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))?;
        let before = sessions.len();
        sessions.retain(|_, (_, updated_at)| !self.config.is_expired(*updated_at, now));
        Ok(before - sessions.len())
    }
}

// ============================================================================
// DuckDbSessionStore
// ============================================================================

/// Session store persisted in a `sessions` table, so unlocked sessions
/// survive a process restart until they expire.
pub struct DuckDbSessionStore {
    config: SessionConfig,
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbSessionStore {
    pub fn open(db_path: &Path, config: SessionConfig) -> VaultResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA memory_limit='64MB'; PRAGMA threads=1;")?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)), config)
    }

    pub fn open_with_conn(conn: Arc<Mutex<Connection>>, config: SessionConfig) -> VaultResult<Self> {
        let store = Self { config, conn };
        store.ensure_tables()?;
        Ok(store)
    }

    pub fn open_in_memory(config: SessionConfig) -> VaultResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)), config)
    }

    fn ensure_tables(&self) -> VaultResult<()> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id VARCHAR PRIMARY KEY,
                data VARCHAR NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl SessionStore for DuckDbSessionStore {
    fn load(&self, id: &SessionId) -> VaultResult<Option<SessionData>> {
        let now = Utc::now().timestamp_millis();
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;

        let result: Result<(String, i64), _> = conn.query_row(
            "SELECT data, updated_at FROM sessions WHERE session_id = ?",
            params![id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        let (mut json, updated_at) = match result {
            Ok(row) => row,
            Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if self.config.is_expired(updated_at, now) {
            json.zeroize();
            conn.execute("DELETE FROM sessions WHERE session_id = ?", params![id.as_str()])?;
            debug!(session = ?id, "session expired");
            return Ok(None);
        }

        let parsed = serde_json::from_str::<SessionData>(&json);
        json.zeroize();
        let data = parsed?;
        conn.execute(
            "UPDATE sessions SET updated_at = ? WHERE session_id = ?",
            params![now, id.as_str()],
        )?;
        Ok(Some(data))
    }

    fn save(&self, id: &SessionId, data: &SessionData) -> VaultResult<()> {
        let now = Utc::now().timestamp_millis();
        let mut json = serde_json::to_string(data)?;
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        let result = conn.execute(
            "INSERT OR REPLACE INTO sessions (session_id, data, created_at, updated_at)
             VALUES (?, ?, COALESCE((SELECT created_at FROM sessions WHERE session_id = ?), ?), ?)",
            params![id.as_str(), json, id.as_str(), now, now],
        );
        json.zeroize();
        result?;
        Ok(())
    }

    fn destroy(&self, id: &SessionId) -> VaultResult<()> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        conn.execute("DELETE FROM sessions WHERE session_id = ?", params![id.as_str()])?;
        Ok(())
    }

    fn purge_expired(&self) -> VaultResult<usize> {
        let timeout_ms = i64::try_from(self.config.idle_timeout.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(timeout_ms);
        let conn = self.conn.lock().map_err(|e| VaultError::Storage(e.to_string()))?;
        let removed = conn.execute("DELETE FROM sessions WHERE updated_at <= ?", params![cutoff])?;
        Ok(removed)
    }
}
