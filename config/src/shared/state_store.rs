use serde::{Deserialize, Serialize};

/// Backend persisting checkpoints: the run guard, the offset cursor and the snapshot ceiling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// Checkpoints live in process memory and are lost on restart.
    Memory,
    /// Checkpoints live in the `importer.checkpoints` table of the source database.
    #[default]
    Postgres,
}
