use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{
    ImportConfig, PgConnectionConfig, SinkConfig, StateStoreConfig, ValidationError,
};

/// Complete configuration of the importer service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImporterConfig {
    /// Database holding the source table and the export log.
    pub source: PgConnectionConfig,
    pub import: ImportConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
}

impl Config for ImporterConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.import.validate()?;
        self.sink.validate()
    }
}
