use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, Postgres, Row, TypeInfo};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, ImportResult};
use crate::executor::{Param, QueryExecutor, Statement};
use crate::import_error;
use crate::types::{Cell, RowSet, SourceRow};

/// [`QueryExecutor`] backed by a Postgres server.
///
/// Every call opens its own connection and closes it before returning, whether the statement
/// succeeded or not.
#[derive(Debug, Clone)]
pub struct PgQueryExecutor {
    options: PgConnectOptions,
}

impl PgQueryExecutor {
    pub fn new(config: &PgConnectionConfig) -> Self {
        Self {
            options: config.with_db(),
        }
    }

    async fn run(connection: &mut PgConnection, statement: &Statement) -> ImportResult<RowSet> {
        let query = bind_params(sqlx::query(&statement.sql), &statement.params);
        let rows = query.fetch_all(&mut *connection).await.map_err(|err| {
            import_error!(
                ErrorKind::SourceQueryFailed,
                "Source query failed",
                format!("{} failed: {err}", statement.kind),
                source: err
            )
        })?;

        rows.iter().map(decode_row).collect()
    }
}

impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, statement: &Statement) -> ImportResult<RowSet> {
        debug!(kind = %statement.kind, "executing statement on source database");

        let mut connection = PgConnection::connect_with(&self.options)
            .await
            .map_err(|err| {
                import_error!(
                    ErrorKind::SourceQueryFailed,
                    "Could not connect to the source database",
                    err.to_string(),
                    source: err
                )
            })?;

        let result = Self::run(&mut connection, statement).await;

        if let Err(err) = connection.close().await {
            warn!(error = %err, kind = %statement.kind, "failed to close source connection");
        }

        result
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Param],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Param::Int(value) => query.bind(*value),
            Param::Text(value) => query.bind(value.as_str()),
            Param::TextArray(values) => query.bind(values.as_slice()),
        };
    }

    query
}

fn decode_row(row: &PgRow) -> ImportResult<SourceRow> {
    let mut columns = Vec::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let type_name = column.type_info().name();

        let cell = decode_cell(row, index, type_name).map_err(|err| {
            import_error!(
                ErrorKind::SourceQueryFailed,
                "Could not decode a source column",
                format!("column `{}` of type {type_name}: {err}", column.name()),
                source: err
            )
        })?;

        columns.push((column.name().to_owned(), cell));
    }

    Ok(SourceRow::new(columns))
}

fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Result<Cell, sqlx::Error> {
    let cell = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Cell::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Cell::I64(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Cell::I64(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Cell::I64),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Cell::F64(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Cell::F64),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(index)?
            .map(Cell::Numeric),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
            row.try_get::<Option<String>, _>(index)?.map(Cell::String)
        }
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(Cell::Json),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Cell::Date),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(Cell::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Cell::TimestampTz),
        "UUID" => row.try_get::<Option<Uuid>, _>(index)?.map(Cell::Uuid),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Cell::Bytes),
        other => {
            warn!(
                column_index = index,
                type_name = other,
                "unsupported source column type, the value is read as null"
            );
            None
        }
    };

    Ok(cell.unwrap_or(Cell::Null))
}
