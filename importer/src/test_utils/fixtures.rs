use config::shared::{
    BatchConfig, ImportConfig, ImportMechanism, ProgressStrategy, RetryConfig, ScheduleConfig,
    TablesConfig, TransformationConfig,
};
use serde_json::json;

use crate::types::{Cell, SourceRow};

pub const TEST_IDENTIFIER_COLUMN: &str = "event_id";

/// Import configuration with a batch size of 10, a 3 second retry base and 15 retries.
pub fn test_import_config(strategy: ProgressStrategy, mechanism: ImportMechanism) -> ImportConfig {
    ImportConfig {
        name: "test_import".to_owned(),
        tables: TablesConfig {
            table_name: "public.events".to_owned(),
            event_log_table_name: "public.exported_events".to_owned(),
            import_log_table_name: Some("public.import_log".to_owned()),
            order_by_column: "id".to_owned(),
            identifier_column: TEST_IDENTIFIER_COLUMN.to_owned(),
        },
        batch: BatchConfig { size: 10 },
        retry: RetryConfig {
            base_delay_ms: 3_000,
            max_retries: 15,
        },
        schedule: ScheduleConfig {
            startup_delay_ms: 0,
            idle_delay_ms: 60_000,
            guard_ttl_ms: None,
        },
        progress: strategy,
        mechanism,
        transformation: TransformationConfig::Default,
    }
}

/// Source row understood by the default transformation.
pub fn event_row(id: i64) -> SourceRow {
    SourceRow::new(vec![
        (TEST_IDENTIFIER_COLUMN.to_owned(), Cell::I64(id)),
        ("event".to_owned(), Cell::from("imported_event")),
        ("distinct_id".to_owned(), Cell::from(format!("user-{id}"))),
        (
            "properties".to_owned(),
            Cell::from(json!({ "row": id }).to_string()),
        ),
        ("set".to_owned(), Cell::Null),
    ])
}

/// Source row whose properties payload is not valid JSON.
pub fn malformed_event_row(id: i64) -> SourceRow {
    SourceRow::new(vec![
        (TEST_IDENTIFIER_COLUMN.to_owned(), Cell::I64(id)),
        ("event".to_owned(), Cell::from("imported_event")),
        ("distinct_id".to_owned(), Cell::from(format!("user-{id}"))),
        ("properties".to_owned(), Cell::from("{\"row\": ")),
    ])
}

/// Rows `first..=last` in order.
pub fn event_rows(first: i64, last: i64) -> Vec<SourceRow> {
    (first..=last).map(event_row).collect()
}
