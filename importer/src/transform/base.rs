use std::collections::BTreeMap;

use config::shared::{TablesConfig, TransformationConfig};
use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, ImportResult};
use crate::import_error;
use crate::types::{Cell, ExportedEvent, SourceRow};

const EVENT_COLUMN: &str = "event";
const DISTINCT_ID_COLUMN: &str = "distinct_id";
const TIMESTAMP_COLUMN: &str = "timestamp";
const PROPERTIES_COLUMN: &str = "properties";
const SET_COLUMN: &str = "set";

const DISTINCT_ID_PROPERTY: &str = "distinct_id";
const TIMESTAMP_PROPERTY: &str = "timestamp";
const SET_PROPERTY: &str = "$set";

/// Row to event mapping, chosen once from configuration.
///
/// Applying a transformation performs no I/O. A row that cannot be mapped yields an error with
/// kind [`ErrorKind::MissingColumn`] or [`ErrorKind::InvalidData`] and is meant to be dropped
/// from its batch by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformation {
    /// Reads the `event`, `distinct_id` and `timestamp` columns plus the JSON `properties` and
    /// `set` payloads.
    Default { identifier_column: String },
    /// Reads explicitly configured columns.
    ColumnMap {
        identifier_column: String,
        event_column: String,
        distinct_id_column: String,
        timestamp_column: Option<String>,
        properties: BTreeMap<String, String>,
    },
}

impl Transformation {
    pub fn from_config(tables: &TablesConfig, config: &TransformationConfig) -> Self {
        let identifier_column = tables.identifier_column.clone();

        match config {
            TransformationConfig::Default => Transformation::Default { identifier_column },
            TransformationConfig::ColumnMap {
                event_column,
                distinct_id_column,
                timestamp_column,
                properties,
            } => Transformation::ColumnMap {
                identifier_column,
                event_column: event_column.clone(),
                distinct_id_column: distinct_id_column.clone(),
                timestamp_column: timestamp_column.clone(),
                properties: properties.clone(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transformation::Default { .. } => "default",
            Transformation::ColumnMap { .. } => "column_map",
        }
    }

    pub fn identifier_column(&self) -> &str {
        match self {
            Transformation::Default { identifier_column }
            | Transformation::ColumnMap {
                identifier_column, ..
            } => identifier_column,
        }
    }

    /// Returns the identifier of `row` as recorded in the export log, [`None`] when the row has
    /// none.
    pub fn identifier(&self, row: &SourceRow) -> Option<String> {
        row.get_non_null(self.identifier_column())
            .and_then(Cell::to_text)
    }

    /// Builds the event of `row`.
    pub fn apply(&self, row: &SourceRow) -> ImportResult<ExportedEvent> {
        match self {
            Transformation::Default { identifier_column } => {
                apply_default(row, identifier_column)
            }
            Transformation::ColumnMap {
                identifier_column,
                event_column,
                distinct_id_column,
                timestamp_column,
                properties,
            } => apply_column_map(
                row,
                identifier_column,
                event_column,
                distinct_id_column,
                timestamp_column.as_deref(),
                properties,
            ),
        }
    }
}

fn apply_default(row: &SourceRow, identifier_column: &str) -> ImportResult<ExportedEvent> {
    let name = required_text(row, EVENT_COLUMN)?;
    let id = required_text(row, identifier_column)?;

    let mut properties = Map::new();
    if let Some(distinct_id) = row.get_non_null(DISTINCT_ID_COLUMN) {
        properties.insert(DISTINCT_ID_PROPERTY.to_owned(), text_value(distinct_id));
    }
    if let Some(timestamp) = row.get_non_null(TIMESTAMP_COLUMN) {
        properties.insert(TIMESTAMP_PROPERTY.to_owned(), timestamp.to_json());
    }

    match parse_json_payload(row, PROPERTIES_COLUMN)? {
        Some(Value::Object(payload)) => properties.extend(payload),
        Some(other) => bail!(
            ErrorKind::InvalidData,
            "Properties payload is not a JSON object",
            format!("column `{PROPERTIES_COLUMN}` holds {}", json_type_name(&other))
        ),
        None => {}
    }

    if let Some(set) = parse_json_payload(row, SET_COLUMN)? {
        properties.insert(SET_PROPERTY.to_owned(), set);
    }

    Ok(ExportedEvent {
        name,
        id,
        properties,
    })
}

fn apply_column_map(
    row: &SourceRow,
    identifier_column: &str,
    event_column: &str,
    distinct_id_column: &str,
    timestamp_column: Option<&str>,
    mapped: &BTreeMap<String, String>,
) -> ImportResult<ExportedEvent> {
    let name = required_text(row, event_column)?;
    let id = required_text(row, identifier_column)?;
    let distinct_id = required_text(row, distinct_id_column)?;

    let mut properties = Map::new();
    properties.insert(DISTINCT_ID_PROPERTY.to_owned(), Value::String(distinct_id));

    if let Some(timestamp_column) = timestamp_column {
        let timestamp = row.get_non_null(timestamp_column).ok_or_else(|| {
            import_error!(
                ErrorKind::MissingColumn,
                "Required column is missing or null",
                format!("column `{timestamp_column}`")
            )
        })?;
        properties.insert(TIMESTAMP_PROPERTY.to_owned(), timestamp.to_json());
    }

    for (column, property) in mapped {
        let cell = row.get(column).ok_or_else(|| {
            import_error!(
                ErrorKind::MissingColumn,
                "Mapped column is missing",
                format!("column `{column}` mapped to property `{property}`")
            )
        })?;
        properties.insert(property.clone(), cell.to_json());
    }

    Ok(ExportedEvent {
        name,
        id,
        properties,
    })
}

fn required_text(row: &SourceRow, column: &str) -> ImportResult<String> {
    row.get_non_null(column)
        .and_then(Cell::to_text)
        .ok_or_else(|| {
            import_error!(
                ErrorKind::MissingColumn,
                "Required column is missing or null",
                format!("column `{column}`")
            )
        })
}

fn text_value(cell: &Cell) -> Value {
    cell.to_text().map(Value::String).unwrap_or(Value::Null)
}

/// Parses a JSON payload stored as text or as a json column. Missing and null payloads, JSON
/// `null` included, yield [`None`].
fn parse_json_payload(row: &SourceRow, column: &str) -> ImportResult<Option<Value>> {
    let value = match row.get_non_null(column) {
        None => return Ok(None),
        Some(Cell::Json(value)) => value.clone(),
        Some(Cell::String(text)) => serde_json::from_str(text).map_err(|err| {
            import_error!(
                ErrorKind::InvalidData,
                "Malformed JSON payload",
                format!("column `{column}`: {err}"),
                source: err
            )
        })?,
        Some(other) => bail!(
            ErrorKind::InvalidData,
            "JSON payload column has an unexpected type",
            format!("column `{column}` holds {other:?}")
        ),
    };

    if value.is_null() {
        return Ok(None);
    }

    Ok(Some(value))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
