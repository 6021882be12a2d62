use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rover_common::{Checkpoint, ThreadId};

use super::CheckpointStore;
use crate::errors::StoreError;

/// SQLite-backed store: one row per thread, replaced on every write.
///
/// The connection sits behind a mutex and every query runs on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id  TEXT PRIMARY KEY,
    body       TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

impl SqliteStore {
    /// Open (or create) a database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))
            .map_err(StoreError::Database)?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")
            .map_err(StoreError::Database)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create checkpoints table")
            .map_err(StoreError::Database)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("SQLite task panicked")
        .map_err(StoreError::Database)?
    }
}

fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |e| StoreError::Database(anyhow::Error::new(e).context(context))
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get(&self, thread: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        let id = thread.clone();
        self.call(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM checkpoints WHERE thread_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err("Failed to read checkpoint"))?;
            body.map(|json| {
                Checkpoint::from_json(&json).map_err(|source| StoreError::Serialization {
                    thread: id.to_string(),
                    source,
                })
            })
            .transpose()
        })
        .await
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let body = checkpoint
            .to_json()
            .map_err(|source| StoreError::Serialization {
                thread: checkpoint.thread_id.to_string(),
                source,
            })?;
        let id = checkpoint.thread_id.to_string();
        let updated_at = checkpoint.updated_at.to_rfc3339();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (thread_id, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(thread_id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![id, body, updated_at],
            )
            .map_err(db_err("Failed to write checkpoint"))?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ThreadId>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare("SELECT thread_id FROM checkpoints ORDER BY thread_id")
                .map_err(db_err("Failed to list checkpoints"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err("Failed to list checkpoints"))?;
            let mut ids = Vec::new();
            for row in rows {
                let raw = row.map_err(db_err("Failed to read thread id"))?;
                if let Some(id) = ThreadId::new(raw) {
                    ids.push(id);
                }
            }
            Ok(ids)
        })
        .await
    }

    async fn delete(&self, thread: &ThreadId) -> Result<(), StoreError> {
        let id = thread.clone();
        self.call(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM checkpoints WHERE thread_id = ?1",
                    params![id.as_str()],
                )
                .map_err(db_err("Failed to delete checkpoint"))?;
            if removed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }
}
