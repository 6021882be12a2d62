//! Checkpoint persistence.
//!
//! The engine only talks to [`CheckpointStore`]. Backends:
//!
//! | Backend | Where | Use |
//! |---------|-------|-----|
//! | [`MemoryStore`] | process memory | tests, one-shot runs |
//! | [`FileStore`] | `.rover/threads/<id>.json` | default CLI backend |
//! | [`SqliteStore`] | one SQLite file | many threads |

mod file;
mod memory;
mod sqlite;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use rover_common::{Checkpoint, ThreadId};

use crate::errors::StoreError;

/// Durable mapping from thread id to its latest checkpoint.
///
/// `put` replaces the previous checkpoint atomically: a reader sees either the
/// old or the new one, never a mix.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread: &ThreadId) -> Result<Option<Checkpoint>, StoreError>;

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// All thread ids, sorted.
    async fn list(&self) -> Result<Vec<ThreadId>, StoreError>;

    /// Remove a thread. Fails with [`StoreError::NotFound`] if it is unknown.
    async fn delete(&self, thread: &ThreadId) -> Result<(), StoreError>;

    async fn contains(&self, thread: &ThreadId) -> Result<bool, StoreError> {
        Ok(self.get(thread).await?.is_some())
    }
}

/// Which backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
    Sqlite,
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "file" | "json" => Ok(Self::File),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(format!(
                "unknown store backend '{}' (expected memory, file or sqlite)",
                other
            )),
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Sqlite => "sqlite",
        };
        write!(f, "{}", s)
    }
}

/// Open a backend rooted at `path` (a directory for `file`, a database file
/// for `sqlite`, ignored for `memory`).
pub fn open(kind: StoreKind, path: &Path) -> Result<Arc<dyn CheckpointStore>, StoreError> {
    Ok(match kind {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => Arc::new(FileStore::open(path)?),
        StoreKind::Sqlite => Arc::new(SqliteStore::open(path)?),
    })
}

/// Per-thread mutual exclusion shared by every engine operation on a store.
///
/// Operations on different threads never contend.
#[derive(Debug, Clone, Default)]
pub struct ThreadLocks {
    inner: Arc<DashMap<ThreadId, Arc<Mutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `thread`. Released when the guard drops.
    pub async fn lock(&self, thread: &ThreadId) -> OwnedMutexGuard<()> {
        let mutex = self.inner.entry(thread.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drop the lock entry of a deleted thread.
    pub fn forget(&self, thread: &ThreadId) {
        self.inner.remove(thread);
    }
}
