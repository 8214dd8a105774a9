use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ErrorKind, ImportResult};
use crate::import_error;

/// Key of the run guard state.
pub const RUN_GUARD_KEY: &str = "run_guard";
/// Key of the offset cursor.
pub const CURSOR_KEY: &str = "cursor";
/// Key of the historical snapshot ceiling.
pub const SNAPSHOT_KEY: &str = "snapshot";
/// Key of the identifiers of rows dropped by the transformation.
pub const DROPPED_KEY: &str = "dropped";
/// Key of the run scheduled by a single tick invocation for the next one.
pub const NEXT_RUN_KEY: &str = "next_run";

/// Small key-value store surviving between ticks.
///
/// Implementations are cheap to clone and every clone sees the same data.
pub trait CheckpointStore {
    /// Returns the value stored under `key`, or [`None`] when nothing was stored yet.
    fn get(&self, key: &str) -> impl Future<Output = ImportResult<Option<Value>>> + Send;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> impl Future<Output = ImportResult<()>> + Send;
}

/// Loads and deserializes the checkpoint stored under `key`.
pub async fn load_checkpoint<C, T>(store: &C, key: &str) -> ImportResult<Option<T>>
where
    C: CheckpointStore,
    T: DeserializeOwned,
{
    let Some(value) = store.get(key).await? else {
        return Ok(None);
    };

    let checkpoint = serde_json::from_value(value).map_err(|err| {
        import_error!(
            ErrorKind::CheckpointStoreFailed,
            "Stored checkpoint has an unexpected shape",
            format!("key `{key}`: {err}"),
            source: err
        )
    })?;

    Ok(Some(checkpoint))
}

/// Serializes `checkpoint` and stores it under `key`.
pub async fn store_checkpoint<C, T>(store: &C, key: &str, checkpoint: &T) -> ImportResult<()>
where
    C: CheckpointStore,
    T: Serialize,
{
    let value = serde_json::to_value(checkpoint)?;
    store.set(key, value).await
}
