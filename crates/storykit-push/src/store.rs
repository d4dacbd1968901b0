//! Durable string key-value state.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{PushError, PushResult};

/// `"true"` or `"false"`: whether the backend confirmed the subscription.
pub const PUSH_ENABLED: &str = "pushEnabled";
/// JSON mirror of the confirmed subscription record.
pub const PUSH_SUBSCRIPTION: &str = "pushSubscription";
/// Bearer token of the signed-in user. Written by the login flow.
pub const TOKEN: &str = "token";

/// Persistence port for local flags.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PushResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> PushResult<()>;
    fn remove(&self, key: &str) -> PushResult<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ==================== SQLite ====================

/// SQLite-backed store; one `kv` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> PushResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PushError::Storage(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| PushError::Storage(format!("Failed to open store: {}", e)))?;
        Self::init(conn)
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> PushResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PushResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> PushResult<Option<String>> {
        let conn = lock(&self.conn);
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> PushResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        debug!(key, "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> PushResult<()> {
        let conn = lock(&self.conn);
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

// ==================== Memory ====================

/// Volatile store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> PushResult<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PushResult<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PushResult<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get(PUSH_ENABLED).unwrap(), None);

        store.set(PUSH_ENABLED, "true").unwrap();
        assert_eq!(store.get(PUSH_ENABLED).unwrap().as_deref(), Some("true"));

        store.set(PUSH_ENABLED, "false").unwrap();
        assert_eq!(store.get(PUSH_ENABLED).unwrap().as_deref(), Some("false"));

        store.remove(PUSH_ENABLED).unwrap();
        assert_eq!(store.get(PUSH_ENABLED).unwrap(), None);
        store.remove(PUSH_ENABLED).unwrap();
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("storykit.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set(PUSH_SUBSCRIPTION, r#"{"endpoint":"https://push.test/1"}"#).unwrap();
            store.set(TOKEN, "secret").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(PUSH_SUBSCRIPTION).unwrap().as_deref(),
            Some(r#"{"endpoint":"https://push.test/1"}"#)
        );
        assert_eq!(store.get(TOKEN).unwrap().as_deref(), Some("secret"));
    }
}
