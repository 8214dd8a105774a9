use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A single column value decoded from a source row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Numeric(BigDecimal),
    String(String),
    Json(Value),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Renders the cell as text, as used for identifiers and event names.
    ///
    /// Returns [`None`] for null cells.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Cell::Null => return None,
            Cell::String(value) => value.clone(),
            Cell::Json(Value::String(value)) => value.clone(),
            other => match other.to_json() {
                Value::String(value) => value,
                value => value.to_string(),
            },
        };

        Some(text)
    }

    /// Converts the cell into a JSON value for event properties.
    ///
    /// Timestamps render as RFC 3339, numerics keep their exact decimal text and bytes are
    /// rendered as `\x` prefixed hex like Postgres does.
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Bool(value) => Value::Bool(*value),
            Cell::I64(value) => Value::from(*value),
            Cell::F64(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Numeric(value) => Value::String(value.normalized().to_string()),
            Cell::String(value) => Value::String(value.clone()),
            Cell::Json(value) => value.clone(),
            Cell::Date(value) => Value::String(value.format("%Y-%m-%d").to_string()),
            Cell::Timestamp(value) => {
                Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Cell::TimestampTz(value) => {
                Value::String(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Cell::Uuid(value) => Value::String(value.to_string()),
            Cell::Bytes(value) => {
                let mut hex = String::with_capacity(2 + value.len() * 2);
                hex.push_str("\\x");
                for byte in value {
                    hex.push_str(&format!("{byte:02x}"));
                }
                Value::String(hex)
            }
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_owned())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<Value> for Cell {
    fn from(value: Value) -> Self {
        Cell::Json(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
