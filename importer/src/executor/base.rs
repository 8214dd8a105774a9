use std::fmt;
use std::future::Future;

use crate::error::ImportResult;
use crate::types::RowSet;

/// What a [`Statement`] does.
///
/// Executors that do not speak SQL, like the in-memory source used in tests, dispatch on this
/// instead of parsing the statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Counts source rows that have no export log entry. Returns one row with a `count` column.
    /// Params: the dropped identifiers.
    CountRemaining,
    /// Fetches the next rows without an export log entry. Params: the dropped identifiers,
    /// `limit`.
    FetchBatch,
    /// Counts every source row. Returns one row with a `count` column.
    CountTotal,
    /// Fetches rows at a position of the ordered table. Params: `offset`, `limit`.
    FetchPage,
    /// Appends export log entries. Params: the delivered identifiers.
    RecordExported,
    /// Appends a message to the import log. Params: the message.
    LogMessage,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::CountRemaining => "count_remaining",
            StatementKind::FetchBatch => "fetch_batch",
            StatementKind::CountTotal => "count_total",
            StatementKind::FetchPage => "fetch_page",
            StatementKind::RecordExported => "record_exported",
            StatementKind::LogMessage => "log_message",
        };

        f.write_str(name)
    }
}

/// A positional statement parameter, bound as `$1`, `$2`, ...
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
    TextArray(Vec<String>),
}

/// A SQL statement together with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(kind: StatementKind, sql: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            params,
        }
    }

    /// Returns the integer parameter at `index`, if it is one.
    pub fn int_param(&self, index: usize) -> Option<i64> {
        match self.params.get(index) {
            Some(Param::Int(value)) => Some(*value),
            _ => None,
        }
    }
}

/// Runs statements against the source database.
///
/// Implementations hold no connection between calls and never retry. Any failure to connect or
/// to run the statement is reported as [`crate::error::ErrorKind::SourceQueryFailed`].
pub trait QueryExecutor {
    fn execute(&self, statement: &Statement) -> impl Future<Output = ImportResult<RowSet>> + Send;
}
