//! SQLite store backend.
//!
//! Three tables: `keys` (key hash, serialized key, function identity),
//! `"values"` (value blobs), and `tags` (one row per tag). Value and tag
//! writes happen in one transaction, so readers never observe a value
//! with a stale tag set. Busy and locked errors are retried with
//! exponential back-off.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use xun_core::config::StoreSpec;
use xun_core::Value;

use crate::error::StoreError;
use crate::key::StoreKey;
use crate::query::TagCondition;
use crate::retry::with_backoff;
use crate::traits::{Store, Tags};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS keys (
    key_hash       TEXT PRIMARY KEY,
    key_blob       BLOB NOT NULL,
    function_name  TEXT NOT NULL,
    function_hash  TEXT
);
CREATE TABLE IF NOT EXISTS \"values\" (
    key_hash   TEXT PRIMARY KEY REFERENCES keys(key_hash),
    value_blob BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS tags (
    key_hash TEXT NOT NULL REFERENCES keys(key_hash),
    name     TEXT NOT NULL,
    value    TEXT NOT NULL,
    PRIMARY KEY (key_hash, name)
);
";

pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and if necessary initializes) a store database.
    pub fn new(path: impl Into<PathBuf>) -> Result<SqliteStore, StoreError> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(
        &self,
        operation: &str,
        f: impl Fn(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        with_backoff(operation, || f(&mut conn))
    }
}

impl Store for SqliteStore {
    fn contains(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let hash = key.content_hash();
        self.with_conn("sqlite contains", |conn| {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM keys WHERE key_hash = ?1",
                    params![hash],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(exists.is_some())
        })
    }

    fn store(&self, key: &StoreKey, value: &Value, tags: &Tags) -> Result<(), StoreError> {
        let hash = key.content_hash();
        let key_blob = serde_json::to_vec(key)?;
        let value_blob = serde_json::to_vec(value)?;
        let function_name = key.function_name().to_string();
        let function_hash = key.function_hash().map(|h| h.to_string());

        self.with_conn("sqlite store", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR REPLACE INTO keys
                     (key_hash, key_blob, function_name, function_hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![hash, key_blob, function_name, function_hash],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO \"values\" (key_hash, value_blob)
                 VALUES (?1, ?2)",
                params![hash, value_blob],
            )?;
            tx.execute("DELETE FROM tags WHERE key_hash = ?1", params![hash])?;
            for (name, value) in tags {
                tx.execute(
                    "INSERT INTO tags (key_hash, name, value) VALUES (?1, ?2, ?3)",
                    params![hash, name, value],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn load(&self, key: &StoreKey) -> Result<Value, StoreError> {
        let hash = key.content_hash();
        let blob: Option<Vec<u8>> = self.with_conn("sqlite load", |conn| {
            Ok(conn
                .query_row(
                    "SELECT value_blob FROM \"values\" WHERE key_hash = ?1",
                    params![hash],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        match blob {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::not_found(key)),
        }
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        let hash = key.content_hash();
        let removed = self.with_conn("sqlite remove", |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM tags WHERE key_hash = ?1", params![hash])?;
            tx.execute(
                "DELETE FROM \"values\" WHERE key_hash = ?1",
                params![hash],
            )?;
            let removed =
                tx.execute("DELETE FROM keys WHERE key_hash = ?1", params![hash])?;
            tx.commit()?;
            Ok(removed)
        })?;
        if removed == 0 {
            return Err(StoreError::not_found(key));
        }
        Ok(())
    }

    fn tags(&self, key: &StoreKey) -> Result<Tags, StoreError> {
        if !self.contains(key)? {
            return Err(StoreError::not_found(key));
        }
        let hash = key.content_hash();
        self.with_conn("sqlite tags", |conn| {
            let mut stmt =
                conn.prepare("SELECT name, value FROM tags WHERE key_hash = ?1")?;
            let rows = stmt.query_map(params![hash], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut tags = Tags::new();
            for row in rows {
                let (name, value) = row?;
                tags.insert(name, value);
            }
            Ok(tags)
        })
    }

    fn query(&self, conditions: &[TagCondition]) -> Result<Vec<StoreKey>, StoreError> {
        let entries: Vec<(Vec<u8>, Tags)> = self.with_conn("sqlite query", |conn| {
            let mut stmt = conn.prepare(
                "SELECT k.key_hash, k.key_blob, t.name, t.value
                 FROM keys k LEFT JOIN tags t ON t.key_hash = k.key_hash
                 ORDER BY k.key_hash",
            )?;
            let mut rows = stmt.query([])?;
            let mut entries: Vec<(String, Vec<u8>, Tags)> = Vec::new();
            while let Some(row) = rows.next()? {
                let hash: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let name: Option<String> = row.get(2)?;
                let value: Option<String> = row.get(3)?;
                if entries.last().map(|(h, _, _)| h != &hash).unwrap_or(true) {
                    entries.push((hash, blob, Tags::new()));
                }
                if let (Some(name), Some(value)) = (name, value) {
                    let last = entries.last_mut().expect("entry pushed above");
                    last.2.insert(name, value);
                }
            }
            Ok(entries
                .into_iter()
                .map(|(_, blob, tags)| (blob, tags))
                .collect())
        })?;

        let mut matches = Vec::new();
        for (blob, tags) in entries {
            if conditions.iter().all(|c| c.matches(&tags)) {
                matches.push(serde_json::from_slice(&blob)?);
            }
        }
        Ok(matches)
    }

    fn spec(&self) -> Option<StoreSpec> {
        Some(StoreSpec::Sqlite {
            path: self.path.clone(),
        })
    }
}
