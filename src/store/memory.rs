use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use rover_common::{Checkpoint, ThreadId};

use super::CheckpointStore;
use crate::errors::StoreError;

/// In-process store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    threads: RwLock<BTreeMap<ThreadId, Checkpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, thread: &ThreadId) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.threads.read().await.get(thread).cloned())
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.threads
            .write()
            .await
            .insert(checkpoint.thread_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ThreadId>, StoreError> {
        Ok(self.threads.read().await.keys().cloned().collect())
    }

    async fn delete(&self, thread: &ThreadId) -> Result<(), StoreError> {
        match self.threads.write().await.remove(thread) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(thread.clone())),
        }
    }
}
