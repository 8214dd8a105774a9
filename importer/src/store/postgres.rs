use config::shared::PgConnectionConfig;
use postgres::checkpoints::{get_checkpoint, upsert_checkpoint};
use postgres::pool::connect_to_source_database_lazy;
use serde_json::Value;
use sqlx::PgPool;
use tracing::debug;

use crate::error::{ErrorKind, ImportResult};
use crate::import_error;
use crate::store::CheckpointStore;

const NUM_POOL_CONNECTIONS: u32 = 1;

/// [`CheckpointStore`] persisted in the `importer.checkpoints` table.
///
/// Checkpoints are namespaced by import name so several importers can share the table.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    import_name: String,
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Creates a store whose connection is opened on first use.
    pub fn new(import_name: String, connection_config: &PgConnectionConfig) -> Self {
        let pool = connect_to_source_database_lazy(connection_config, NUM_POOL_CONNECTIONS);
        Self::with_pool(import_name, pool)
    }

    pub fn with_pool(import_name: String, pool: PgPool) -> Self {
        Self { import_name, pool }
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    async fn get(&self, key: &str) -> ImportResult<Option<Value>> {
        let row = get_checkpoint(&self.pool, &self.import_name, key)
            .await
            .map_err(|err| {
                import_error!(
                    ErrorKind::CheckpointStoreFailed,
                    "Failed to load checkpoint",
                    format!("key `{key}` of import `{}`: {err}", self.import_name),
                    source: err
                )
            })?;

        Ok(row.map(|row| row.value))
    }

    async fn set(&self, key: &str, value: Value) -> ImportResult<()> {
        upsert_checkpoint(&self.pool, &self.import_name, key, &value)
            .await
            .map_err(|err| {
                import_error!(
                    ErrorKind::CheckpointStoreFailed,
                    "Failed to store checkpoint",
                    format!("key `{key}` of import `{}`: {err}", self.import_name),
                    source: err
                )
            })?;

        debug!(import_name = %self.import_name, key, "checkpoint stored");

        Ok(())
    }
}
