use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::base::{ValidationError, require_non_empty};

/// Configuration of a single table import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ImportConfig {
    /// Name of the import. Checkpoints and the run guard are namespaced by it.
    pub name: String,
    /// Source, export log and import log tables.
    pub tables: TablesConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// How the engine works out which rows still have to be imported.
    #[serde(default)]
    pub progress: ProgressStrategy,
    /// Whether rows added after the first run are imported too.
    #[serde(default)]
    pub mechanism: ImportMechanism,
    /// How source rows are turned into events.
    #[serde(default)]
    pub transformation: TransformationConfig,
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("import.name", &self.name)?;
        self.tables.validate()?;
        self.batch.validate()?;
        self.retry.validate()?;
        self.schedule.validate()?;
        self.schedule.validate_guard_ttl(&self.retry)?;
        self.transformation.validate()
    }
}

/// Tables and columns the import reads from and writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TablesConfig {
    /// Source table, optionally schema qualified (`schema.table`).
    pub table_name: String,
    /// Append-only log of exported identifiers with columns `(event_id, exported_at)`.
    pub event_log_table_name: String,
    /// Optional log of import messages with columns `(event_at, message)`.
    #[serde(default)]
    pub import_log_table_name: Option<String>,
    /// Column giving the source rows a deterministic order.
    pub order_by_column: String,
    /// Column holding the stable unique identifier of a source row.
    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,
}

impl TablesConfig {
    pub const DEFAULT_IDENTIFIER_COLUMN: &'static str = "event_id";

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_table_name("import.tables.table_name", &self.table_name)?;
        validate_table_name(
            "import.tables.event_log_table_name",
            &self.event_log_table_name,
        )?;
        if let Some(import_log_table_name) = &self.import_log_table_name {
            validate_table_name("import.tables.import_log_table_name", import_log_table_name)?;
        }
        require_non_empty("import.tables.order_by_column", &self.order_by_column)?;
        require_non_empty("import.tables.identifier_column", &self.identifier_column)?;

        if self.table_name == self.event_log_table_name {
            return Err(ValidationError::invalid(
                "import.tables.event_log_table_name",
                "must differ from the source table",
            ));
        }

        Ok(())
    }
}

fn default_identifier_column() -> String {
    TablesConfig::DEFAULT_IDENTIFIER_COLUMN.to_owned()
}

/// Accepts `table` or `schema.table`.
fn validate_table_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    require_non_empty(field, value)?;

    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() > 2 || parts.iter().any(|part| part.trim().is_empty()) {
        return Err(ValidationError::invalid(
            field,
            "must be `table` or `schema.table`",
        ));
    }

    Ok(())
}

/// Batch sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of rows fetched, transformed and delivered per cycle.
    #[serde(default = "default_batch_size")]
    pub size: u32,
}

impl BatchConfig {
    pub const DEFAULT_SIZE: u32 = 10;

    pub const MIN_SIZE: u32 = 10;

    /// Upper bound tolerated by event sinks.
    pub const MAX_SIZE: u32 = 500;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&self.size) {
            return Err(ValidationError::invalid(
                "import.batch.size",
                format!("must be between {} and {}", Self::MIN_SIZE, Self::MAX_SIZE),
            ));
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> u32 {
    BatchConfig::DEFAULT_SIZE
}

/// Exponential backoff applied when the source cannot be queried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Delay before the first retry. Retry `k` waits `base_delay_ms * 2^k`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Number of retries after which a row range is abandoned.
    #[serde(default = "default_retry_max_retries")]
    pub max_retries: u32,
}

impl RetryConfig {
    pub const DEFAULT_BASE_DELAY_MS: u64 = 3_000;

    pub const DEFAULT_MAX_RETRIES: u32 = 15;

    /// Keeps `2^max_retries` well inside `u64` milliseconds.
    pub const MAX_RETRIES_LIMIT: u32 = 32;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_delay_ms == 0 {
            return Err(ValidationError::invalid(
                "import.retry.base_delay_ms",
                "must be greater than 0",
            ));
        }

        if self.max_retries > Self::MAX_RETRIES_LIMIT {
            return Err(ValidationError::invalid(
                "import.retry.max_retries",
                format!("must not exceed {}", Self::MAX_RETRIES_LIMIT),
            ));
        }

        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Longest wait between two ticks of a chain, the backoff before its last retry.
    pub fn longest_backoff_ms(&self) -> u64 {
        let Some(last_retry) = self.max_retries.checked_sub(1) else {
            return 0;
        };

        let factor = 2u64.checked_pow(last_retry).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_delay_ms(),
            max_retries: default_retry_max_retries(),
        }
    }
}

fn default_retry_base_delay_ms() -> u64 {
    RetryConfig::DEFAULT_BASE_DELAY_MS
}

fn default_retry_max_retries() -> u32 {
    RetryConfig::DEFAULT_MAX_RETRIES
}

/// Timing of scheduled runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleConfig {
    /// Delay before the very first run after startup.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Delay before the next run once the source is drained or a range was abandoned.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    /// Age after which a held run guard is considered abandoned by a crashed run.
    ///
    /// `None` keeps a held guard until it is released explicitly.
    #[serde(default)]
    pub guard_ttl_ms: Option<u64>,
}

impl ScheduleConfig {
    pub const DEFAULT_STARTUP_DELAY_MS: u64 = 5_000;

    pub const DEFAULT_IDLE_DELAY_MS: u64 = 60_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.idle_delay_ms == 0 {
            return Err(ValidationError::invalid(
                "import.schedule.idle_delay_ms",
                "must be greater than 0",
            ));
        }

        if self.guard_ttl_ms == Some(0) {
            return Err(ValidationError::invalid(
                "import.schedule.guard_ttl_ms",
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }

    /// Rejects a guard TTL that a chain backing off between two of its ticks could outlive.
    pub fn validate_guard_ttl(&self, retry: &RetryConfig) -> Result<(), ValidationError> {
        let Some(guard_ttl_ms) = self.guard_ttl_ms else {
            return Ok(());
        };

        let longest_backoff_ms = retry.longest_backoff_ms();
        if guard_ttl_ms <= longest_backoff_ms {
            return Err(ValidationError::invalid(
                "import.schedule.guard_ttl_ms",
                format!(
                    "must be greater than the longest retry backoff of {longest_backoff_ms} ms"
                ),
            ));
        }

        Ok(())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn guard_ttl(&self) -> Option<Duration> {
        self.guard_ttl_ms.map(Duration::from_millis)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: default_startup_delay_ms(),
            idle_delay_ms: default_idle_delay_ms(),
            guard_ttl_ms: None,
        }
    }
}

fn default_startup_delay_ms() -> u64 {
    ScheduleConfig::DEFAULT_STARTUP_DELAY_MS
}

fn default_idle_delay_ms() -> u64 {
    ScheduleConfig::DEFAULT_IDLE_DELAY_MS
}

/// Strategy used to track which source rows were already exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStrategy {
    /// Rows without an entry in the export log are remaining. Robust against re-fetches.
    #[default]
    AntiJoin,
    /// A persisted numeric cursor into the ordered source table.
    ///
    /// For sources where the anti-join is too expensive. Skips or repeats rows if the table is
    /// modified between runs.
    Offset,
}

/// Whether the import follows the source table or only copies what existed at the first run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMechanism {
    #[default]
    Continuous,
    /// Captures the number of rows to import on the first run and stops once they are exported.
    HistoricalOnly,
}

/// Row to event mapping, selected once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TransformationConfig {
    /// Reads `event`, `distinct_id`, `timestamp` and the JSON `properties` and `set` columns.
    #[default]
    Default,
    /// Builds events from explicitly mapped columns.
    ColumnMap {
        event_column: String,
        distinct_id_column: String,
        #[serde(default)]
        timestamp_column: Option<String>,
        /// Source column to event property name.
        #[serde(default)]
        properties: BTreeMap<String, String>,
    },
}

impl TransformationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            TransformationConfig::Default => Ok(()),
            TransformationConfig::ColumnMap {
                event_column,
                distinct_id_column,
                timestamp_column,
                properties,
            } => {
                require_non_empty("import.transformation.event_column", event_column)?;
                require_non_empty(
                    "import.transformation.distinct_id_column",
                    distinct_id_column,
                )?;
                if let Some(timestamp_column) = timestamp_column {
                    require_non_empty("import.transformation.timestamp_column", timestamp_column)?;
                }
                if properties
                    .iter()
                    .any(|(column, property)| column.is_empty() || property.is_empty())
                {
                    return Err(ValidationError::invalid(
                        "import.transformation.properties",
                        "column and property names must not be empty",
                    ));
                }

                Ok(())
            }
        }
    }
}
