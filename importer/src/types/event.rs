use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event ready to be delivered to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEvent {
    /// Event name passed to the sink.
    pub name: String,
    /// Identifier of the source row, recorded in the export log once delivered.
    pub id: String,
    pub properties: Map<String, Value>,
}

/// A row of the export log, proof that the row identified by `event_id` was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportLogEntry {
    pub event_id: String,
    pub exported_at: DateTime<Utc>,
}
