//! Persistent plugin state backed by SQLite.
//!
//! A flat key-value table namespaced by plugin name, so plugins can keep
//! state (saved locations, pending predictions) across restarts.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A stored entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open or create a store database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open store database {}", path.display()))?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (state is lost on exit).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Store a value, replacing any existing one.
    pub fn set(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT OR REPLACE INTO kv (namespace, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![namespace, key, value, now],
        )?;
        Ok(())
    }

    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        let value = db
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Remove a value. Returns whether anything was deleted.
    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let db = self.db.lock();
        let n = db.execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            rusqlite::params![namespace, key],
        )?;
        Ok(n > 0)
    }

    /// All entries in a namespace, ordered by key.
    pub fn list(&self, namespace: &str) -> Result<Vec<Entry>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT namespace, key, value, updated_at
             FROM kv WHERE namespace = ?1
             ORDER BY key ASC",
        )?;
        let entries = stmt
            .query_map(rusqlite::params![namespace], |row| {
                Ok(Entry {
                    namespace: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn set_json<T: Serialize>(&self, namespace: &str, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.set(namespace, key, &json)
    }

    pub fn get_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>> {
        match self.get(namespace, key)? {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt stored value {namespace}/{key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
