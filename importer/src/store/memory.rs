use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ImportResult;
use crate::store::CheckpointStore;

/// In-memory [`CheckpointStore`], lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored checkpoint.
    pub async fn checkpoints(&self) -> HashMap<String, Value> {
        self.inner.lock().await.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> ImportResult<Option<Value>> {
        let inner = self.inner.lock().await;
        Ok(inner.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> ImportResult<()> {
        let mut inner = self.inner.lock().await;
        inner.insert(key.to_owned(), value);
        Ok(())
    }
}
