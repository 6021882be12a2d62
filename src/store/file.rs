use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use rover_common::{Checkpoint, ThreadId};

use super::CheckpointStore;
use crate::errors::StoreError;

const LOCK_FILE: &str = ".lock";

/// One pretty-printed JSON file per thread.
///
/// Writes go to a temp file that is renamed over the old checkpoint. A lock
/// file in the directory serialises access across processes.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileStore {
    /// Open a store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread: &ThreadId) -> PathBuf {
        self.dir.join(format!("{}.json", thread.file_stem()))
    }

    fn lock(&self, exclusive: bool) -> Result<File, StoreError> {
        let path = self.dir.join(LOCK_FILE);
        let file = File::create(&path).map_err(io_err(&path))?;
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(io_err(&path))?;
        Ok(file)
    }

    fn read(&self, thread: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        let path = self.path_for(thread);
        let _lock = self.lock(false)?;
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };
        let checkpoint = Checkpoint::from_json(&json).map_err(|source| StoreError::Serialization {
            thread: thread.to_string(),
            source,
        })?;
        if checkpoint.thread_id != *thread {
            return Err(StoreError::ThreadMismatch {
                path,
                expected: thread.clone(),
                found: checkpoint.thread_id,
            });
        }
        Ok(Some(checkpoint))
    }

    fn write(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let json = checkpoint.to_json().map_err(|source| StoreError::Serialization {
            thread: checkpoint.thread_id.to_string(),
            source,
        })?;
        let path = self.path_for(&checkpoint.thread_id);
        let tmp_path = path.with_extension("json.tmp");

        let _lock = self.lock(true)?;
        let mut tmp = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.sync_all())
            .map_err(io_err(&tmp_path))?;
        fs::rename(&tmp_path, &path).map_err(io_err(&path))?;
        debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn ids(&self) -> Result<Vec<ThreadId>, StoreError> {
        let _lock = self.lock(false)?;
        let entries = fs::read_dir(&self.dir).map_err(io_err(&self.dir))?;
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path).map_err(io_err(&path))?;
            let checkpoint =
                Checkpoint::from_json(&json).map_err(|source| StoreError::Serialization {
                    thread: path.display().to_string(),
                    source,
                })?;
            ids.push(checkpoint.thread_id);
        }
        ids.sort();
        Ok(ids)
    }

    fn remove(&self, thread: &ThreadId) -> Result<(), StoreError> {
        if self.read(thread)?.is_none() {
            return Err(StoreError::NotFound(thread.clone()));
        }
        let path = self.path_for(thread);
        let _lock = self.lock(true)?;
        fs::remove_file(&path).map_err(io_err(&path))
    }
}

/// Run blocking file I/O off the async runtime.
async fn blocking<T, F>(store: &FileStore, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&FileStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("file store task panicked: {}", e)))?
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn get(&self, thread: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        let thread = thread.clone();
        blocking(self, move |s| s.read(&thread)).await
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let checkpoint = checkpoint.clone();
        blocking(self, move |s| s.write(&checkpoint)).await
    }

    async fn list(&self) -> Result<Vec<ThreadId>, StoreError> {
        blocking(self, |s| s.ids()).await
    }

    async fn delete(&self, thread: &ThreadId) -> Result<(), StoreError> {
        let thread = thread.clone();
        blocking(self, move |s| s.remove(&thread)).await
    }
}
