//! SQLite-backed key-value snapshot store.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    config::QueueConfig,
    op::{OperationRecord, now_ms},
};

use super::{PersistResult, QueueStore, decode_snapshot, encode_snapshot};

/// Default namespaced key under which the queue snapshot is stored.
pub const DEFAULT_STORAGE_KEY: &str = "offline_queue";

/// SQLite implementation of [`crate::persist::QueueStore`].
///
/// The whole record collection lives in one row keyed by `key`, replaced
/// inside a transaction on every save.
pub struct SqliteQueueStore {
    conn: Connection,
    key: String,
}

impl SqliteQueueStore {
    /// Opens or creates a store at `path` using [`DEFAULT_STORAGE_KEY`].
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        Self::open_with_key(path, DEFAULT_STORAGE_KEY)
    }

    /// Opens or creates a store at `path` under a custom key.
    pub fn open_with_key(path: impl AsRef<Path>, key: impl Into<String>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn, key.into())
    }

    /// Opens or creates a store at `path` under `config.storage_key`.
    pub fn open_configured(path: impl AsRef<Path>, config: &QueueConfig) -> PersistResult<Self> {
        Self::open_with_key(path, config.storage_key.clone())
    }

    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, DEFAULT_STORAGE_KEY.to_string())
    }

    fn init_connection(conn: Connection, key: String) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn, key })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw stored payload, if any.
    pub fn raw(&self) -> PersistResult<Option<Vec<u8>>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM kv WHERE key = ?1",
                params![self.key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    /// Overwrites the stored payload with arbitrary bytes.
    pub fn set_raw(&mut self, payload: &[u8]) -> PersistResult<()> {
        self.conn.execute(
            "INSERT INTO kv(key, payload, ts_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, ts_ms = excluded.ts_ms",
            params![self.key, payload, now_ms() as i64],
        )?;
        Ok(())
    }

    pub fn purge(&mut self) -> PersistResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![self.key])?;
        Ok(count > 0)
    }
}

impl QueueStore for SqliteQueueStore {
    fn load(&mut self) -> PersistResult<Option<Vec<OperationRecord>>> {
        let Some(payload) = self.raw()? else {
            return Ok(None);
        };
        decode_snapshot(&payload).map(Some)
    }

    fn save(&mut self, records: &[OperationRecord]) -> PersistResult<()> {
        let payload = encode_snapshot(records)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO kv(key, payload, ts_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, ts_ms = excluded.ts_ms",
            params![self.key, payload, now_ms() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }
}
