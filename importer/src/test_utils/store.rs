use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, ImportResult};
use crate::store::CheckpointStore;
use crate::store::memory::MemoryCheckpointStore;

/// [`MemoryCheckpointStore`] whose writes can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct FaultyCheckpointStore {
    store: MemoryCheckpointStore,
    failing_writes: Arc<Mutex<HashMap<String, u32>>>,
}

impl FaultyCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` writes of `key` fail.
    pub async fn fail_next_writes(&self, key: &str, times: u32) {
        self.failing_writes
            .lock()
            .await
            .insert(key.to_owned(), times);
    }

    pub fn inner(&self) -> &MemoryCheckpointStore {
        &self.store
    }
}

impl CheckpointStore for FaultyCheckpointStore {
    async fn get(&self, key: &str) -> ImportResult<Option<Value>> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> ImportResult<()> {
        {
            let mut failing_writes = self.failing_writes.lock().await;
            if let Some(remaining) = failing_writes.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    bail!(
                        ErrorKind::CheckpointStoreFailed,
                        "Failed to store checkpoint",
                        format!("injected failure of key `{key}`")
                    );
                }
            }
        }

        self.store.set(key, value).await
    }
}
