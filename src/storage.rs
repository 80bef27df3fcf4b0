//! Durable key-value storage.
//!
//! The coordinator only needs `get` / `set` / `delete` with atomic single-key
//! replace. [`MemoryStore`] serves tests and hosts that persist elsewhere;
//! [`SqliteStore`] (feature `persistence`) is the on-device implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, RunError};

/// Minimal durable key-value contract.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Replace the value for `key`. Readers never observe a partial write.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-process store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| RunError::storage("memory store lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// Read a little-endian counter, treating absent or malformed values as 0.
pub fn read_counter(store: &dyn KeyValueStore, key: &str) -> Result<u64> {
    Ok(store
        .get(key)?
        .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_slice()).ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0))
}

/// Increment a counter and return the new value.
pub fn increment_counter(store: &dyn KeyValueStore, key: &str) -> Result<u64> {
    let next = read_counter(store, key)?.saturating_add(1);
    store.set(key, &next.to_le_bytes())?;
    Ok(next)
}

#[cfg(feature = "persistence")]
pub use sqlite::SqliteStore;

#[cfg(feature = "persistence")]
mod sqlite {
    use std::sync::{Mutex, MutexGuard};

    use log::info;
    use rusqlite::{params, Connection, OptionalExtension};

    use super::KeyValueStore;
    use crate::error::{Result, RunError};

    /// SQLite-backed store. Each `set` is a single `INSERT OR REPLACE`,
    /// which SQLite applies atomically.
    pub struct SqliteStore {
        db: Mutex<Connection>,
    }

    impl SqliteStore {
        /// Open (or create) the store at `db_path`.
        pub fn new(db_path: &str) -> Result<Self> {
            let db = Connection::open(db_path)?;
            Self::init_schema(&db)?;
            info!("[SqliteStore] Opened {}", db_path);
            Ok(Self { db: Mutex::new(db) })
        }

        /// Create an in-memory database (for testing).
        pub fn in_memory() -> Result<Self> {
            Self::new(":memory:")
        }

        fn init_schema(conn: &Connection) -> Result<()> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_store (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
                );
                "#,
            )?;
            Ok(())
        }

        fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
            self.db
                .lock()
                .map_err(|_| RunError::storage("sqlite connection lock poisoned"))
        }
    }

    impl KeyValueStore for SqliteStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let conn = self.conn()?;
            let value = conn
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?",
                    params![key],
                    |row| row.get::<_, Vec<u8>>(0),
                )
                .optional()?;
            Ok(value)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<()> {
            self.conn()?.execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
                 VALUES (?, ?, strftime('%s', 'now'))",
                params![key, value],
            )?;
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.conn()?
                .execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KeyValueStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("a", b"one").unwrap();
        store.set("a", b"two").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some(&b"two"[..]));

        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        // Deleting again is fine
        store.delete("a").unwrap();
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_counters() {
        let store = MemoryStore::new();
        assert_eq!(read_counter(&store, "n").unwrap(), 0);
        assert_eq!(increment_counter(&store, "n").unwrap(), 1);
        assert_eq!(increment_counter(&store, "n").unwrap(), 2);

        store.set("n", b"garbage").unwrap();
        assert_eq!(read_counter(&store, "n").unwrap(), 0);
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_in_memory() {
        exercise(&SqliteStore::in_memory().unwrap());
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::new(path).unwrap();
            store.set("snapshot", b"{\"x\":1}").unwrap();
        }

        let store = SqliteStore::new(path).unwrap();
        assert_eq!(
            store.get("snapshot").unwrap().as_deref(),
            Some(&b"{\"x\":1}"[..])
        );
    }
}
