use config::shared::TablesConfig;
use postgres::identifiers::{quote_column_name, quote_table_name};

use crate::executor::{Param, Statement, StatementKind};

/// Builds the statements run by the progress tracker.
///
/// Identifiers are quoted once at construction, values are always bound as parameters.
#[derive(Debug, Clone)]
pub struct ProgressQueries {
    source_table: String,
    export_log_table: String,
    import_log_table: Option<String>,
    order_by_column: String,
    identifier_column: String,
}

impl ProgressQueries {
    pub fn new(tables: &TablesConfig) -> Self {
        Self {
            source_table: quote_table_name(&tables.table_name),
            export_log_table: quote_table_name(&tables.event_log_table_name),
            import_log_table: tables
                .import_log_table_name
                .as_deref()
                .map(quote_table_name),
            order_by_column: quote_column_name(&tables.order_by_column),
            identifier_column: quote_column_name(&tables.identifier_column),
        }
    }

    pub fn has_import_log(&self) -> bool {
        self.import_log_table.is_some()
    }

    /// Counts source rows without an export log entry, leaving out the `dropped` identifiers.
    pub fn count_remaining(&self, dropped: &[String]) -> Statement {
        let sql = format!(
            "select count(1) as count from {} s where {}",
            self.source_table,
            self.pending_predicate()
        );

        Statement::new(
            StatementKind::CountRemaining,
            sql,
            vec![Param::TextArray(dropped.to_vec())],
        )
    }

    /// Fetches up to `limit` source rows without an export log entry, leaving out the `dropped`
    /// identifiers.
    pub fn fetch_batch(&self, dropped: &[String], limit: u64) -> Statement {
        let sql = format!(
            "select s.* from {} s where {} order by s.{}, s.{} limit $2",
            self.source_table,
            self.pending_predicate(),
            self.order_by_column,
            self.identifier_column
        );

        Statement::new(
            StatementKind::FetchBatch,
            sql,
            vec![Param::TextArray(dropped.to_vec()), int_param(limit)],
        )
    }

    /// Counts every source row.
    pub fn count_total(&self) -> Statement {
        let sql = format!("select count(1) as count from {}", self.source_table);

        Statement::new(StatementKind::CountTotal, sql, vec![])
    }

    /// Fetches up to `limit` source rows starting at `offset` in table order.
    pub fn fetch_page(&self, offset: u64, limit: u64) -> Statement {
        let sql = format!(
            "select * from {} order by {}, {} offset $1 limit $2",
            self.source_table, self.order_by_column, self.identifier_column
        );

        Statement::new(
            StatementKind::FetchPage,
            sql,
            vec![int_param(offset), int_param(limit)],
        )
    }

    /// Appends one export log entry per identifier in a single statement.
    pub fn record_exported(&self, event_ids: Vec<String>) -> Statement {
        let sql = format!(
            "insert into {} (event_id, exported_at) select unnest($1::text[]), now()",
            self.export_log_table
        );

        Statement::new(
            StatementKind::RecordExported,
            sql,
            vec![Param::TextArray(event_ids)],
        )
    }

    /// Appends `message` to the import log, when one is configured.
    pub fn log_message(&self, message: &str) -> Option<Statement> {
        let import_log_table = self.import_log_table.as_ref()?;
        let sql =
            format!("insert into {import_log_table} (event_at, message) values (now(), $1)");

        Some(Statement::new(
            StatementKind::LogMessage,
            sql,
            vec![Param::Text(message.to_owned())],
        ))
    }

    /// Rows with an identifier, no export log entry and no drop record. The dropped identifiers
    /// are always bound as `$1`.
    fn pending_predicate(&self) -> String {
        let id = &self.identifier_column;
        format!(
            "s.{id} is not null \
             and not exists (select 1 from {} l where l.event_id = s.{id}::text) \
             and s.{id}::text <> all($1::text[])",
            self.export_log_table
        )
    }
}

fn int_param(value: u64) -> Param {
    Param::Int(i64::try_from(value).unwrap_or(i64::MAX))
}
