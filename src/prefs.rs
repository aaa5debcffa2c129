//! Durable key/value preferences
//!
//! Holds the remote thread id (and the assistant it belongs to) so a stateful
//! session can resume after restart.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const THREAD_ID_KEY: &str = "thread_id";
pub const ASSISTANT_ID_KEY: &str = "assistant_id";

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("Preference storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type PrefsResult<T> = Result<T, PrefsError>;

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> PrefsResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> PrefsResult<()>;

    fn remove(&self, key: &str) -> PrefsResult<()>;

    /// Set or remove depending on `value`
    fn put(&self, key: &str, value: Option<&str>) -> PrefsResult<()> {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for Arc<T> {
    fn get(&self, key: &str) -> PrefsResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> PrefsResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> PrefsResult<()> {
        (**self).remove(key)
    }
}

/// Process-lifetime preferences
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> PrefsResult<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> PrefsResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PrefsResult<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// `SQLite`-backed preferences
#[derive(Clone)]
pub struct SqlitePreferences {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePreferences {
    /// Open or create the preference file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> PrefsResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> PrefsResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PrefsResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> PrefsResult<T> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&conn)?)
    }
}

impl PreferenceStore for SqlitePreferences {
    fn get(&self, key: &str) -> PrefsResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> PrefsResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO preferences (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> PrefsResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])
        })?;
        Ok(())
    }
}
