use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, ImportResult};
use crate::executor::{Param, QueryExecutor, Statement, StatementKind};
use crate::types::{Cell, ExportLogEntry, RowSet, SourceRow};
use crate::{bail, import_error};

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<SourceRow>,
    export_log: Vec<ExportLogEntry>,
    import_log: Vec<String>,
    executed: Vec<StatementKind>,
    failures: HashMap<StatementKind, (ErrorKind, u32)>,
}

/// In-memory source table with its export and import logs.
///
/// Interprets statements by their [`StatementKind`]. Rows are kept in insertion order, which
/// stands for the order of the ordering column.
#[derive(Debug, Clone)]
pub struct MemorySource {
    identifier_column: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemorySource {
    pub fn new(identifier_column: &str) -> Self {
        Self {
            identifier_column: identifier_column.to_owned(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub async fn insert_rows(&self, rows: impl IntoIterator<Item = SourceRow>) {
        self.inner.lock().await.rows.extend(rows);
    }

    /// Makes the next `times` statements of `kind` fail as if the database was unreachable.
    pub async fn fail_next(&self, kind: StatementKind, times: u32) {
        self.fail_next_with(kind, ErrorKind::SourceQueryFailed, times)
            .await;
    }

    /// Makes the next `times` statements of `kind` fail with an error of `error_kind`.
    pub async fn fail_next_with(&self, kind: StatementKind, error_kind: ErrorKind, times: u32) {
        self.inner
            .lock()
            .await
            .failures
            .insert(kind, (error_kind, times));
    }

    pub async fn export_log(&self) -> Vec<ExportLogEntry> {
        self.inner.lock().await.export_log.clone()
    }

    /// Identifiers in the export log, in insertion order.
    pub async fn exported_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .export_log
            .iter()
            .map(|entry| entry.event_id.clone())
            .collect()
    }

    pub async fn import_log(&self) -> Vec<String> {
        self.inner.lock().await.import_log.clone()
    }

    /// Kinds of every statement executed so far, failed ones included.
    pub async fn executed(&self) -> Vec<StatementKind> {
        self.inner.lock().await.executed.clone()
    }

    fn identifier(&self, row: &SourceRow) -> Option<String> {
        row.get(&self.identifier_column).and_then(Cell::to_text)
    }

    /// Rows with an identifier that is neither exported nor in `dropped`.
    fn pending<'a>(&self, inner: &'a Inner, dropped: &[String]) -> Vec<&'a SourceRow> {
        let excluded: HashSet<&str> = inner
            .export_log
            .iter()
            .map(|entry| entry.event_id.as_str())
            .chain(dropped.iter().map(String::as_str))
            .collect();

        inner
            .rows
            .iter()
            .filter(|row| {
                self.identifier(row)
                    .is_some_and(|id| !excluded.contains(id.as_str()))
            })
            .collect()
    }
}

impl QueryExecutor for MemorySource {
    async fn execute(&self, statement: &Statement) -> ImportResult<RowSet> {
        let mut inner = self.inner.lock().await;
        inner.executed.push(statement.kind);

        if let Some((error_kind, remaining)) = inner.failures.get_mut(&statement.kind) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!(
                    *error_kind,
                    "Injected source failure",
                    format!("injected failure of {}", statement.kind)
                );
            }
        }

        let rows = match statement.kind {
            StatementKind::CountRemaining => {
                let dropped = text_array_param(statement, 0)?;
                count_row(self.pending(&inner, dropped).len())
            }
            StatementKind::CountTotal => count_row(inner.rows.len()),
            StatementKind::FetchBatch => {
                let dropped = text_array_param(statement, 0)?;
                let limit = usize_param(statement, 1)?;
                self.pending(&inner, dropped)
                    .into_iter()
                    .take(limit)
                    .cloned()
                    .collect()
            }
            StatementKind::FetchPage => {
                let offset = usize_param(statement, 0)?;
                let limit = usize_param(statement, 1)?;
                inner.rows.iter().skip(offset).take(limit).cloned().collect()
            }
            StatementKind::RecordExported => {
                let Some(Param::TextArray(ids)) = statement.params.first() else {
                    bail!(ErrorKind::InvalidState, "Missing exported identifiers");
                };
                let exported_at = Utc::now();
                let entries = ids.iter().map(|event_id| ExportLogEntry {
                    event_id: event_id.clone(),
                    exported_at,
                });
                inner.export_log.extend(entries.collect::<Vec<_>>());
                vec![]
            }
            StatementKind::LogMessage => {
                let Some(Param::Text(message)) = statement.params.first() else {
                    bail!(ErrorKind::InvalidState, "Missing import log message");
                };
                inner.import_log.push(message.clone());
                vec![]
            }
        };

        Ok(rows)
    }
}

fn count_row(count: usize) -> RowSet {
    vec![SourceRow::new(vec![(
        "count".to_owned(),
        Cell::I64(count as i64),
    )])]
}

fn text_array_param(statement: &Statement, index: usize) -> ImportResult<&[String]> {
    match statement.params.get(index) {
        Some(Param::TextArray(values)) => Ok(values),
        _ => Err(import_error!(
            ErrorKind::InvalidState,
            "Missing text array parameter",
            format!("parameter {index} of {}", statement.kind)
        )),
    }
}

fn usize_param(statement: &Statement, index: usize) -> ImportResult<usize> {
    statement
        .int_param(index)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| {
            import_error!(
                ErrorKind::InvalidState,
                "Missing integer parameter",
                format!("parameter {index} of {}", statement.kind)
            )
        })
}
