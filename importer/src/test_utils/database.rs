use config::shared::{PgConnectionConfig, TablesConfig, TlsConfig};
use postgres::migrations::migrate_checkpoint_store;
use postgres::test_utils::{create_pg_database, drop_pg_database};
use sqlx::PgPool;
use uuid::Uuid;

use crate::test_utils::fixtures::TEST_IDENTIFIER_COLUMN;

/// Schema holding the source, export log and import log tables of a test database.
pub const TEST_DATABASE_SCHEMA: &str = "test";

/// Reads the connection settings of the local test server and picks a unique database name.
///
/// Configuration is read from environment variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// A throwaway database with the importer tables and checkpoint store.
///
/// Call [`TestDatabase::cleanup`] at the end of the test to drop it.
#[derive(Debug)]
pub struct TestDatabase {
    pub config: PgConnectionConfig,
    pub pool: PgPool,
}

impl TestDatabase {
    /// Creates a database holding an empty `test.events` source table, its export and import
    /// logs, and the migrated checkpoint table.
    ///
    /// # Panics
    ///
    /// Panics if the database or any of its tables cannot be created.
    pub async fn spawn() -> Self {
        let config = local_pg_connection_config();
        let pool = create_pg_database(&config).await;

        for statement in [
            format!("create schema {TEST_DATABASE_SCHEMA}"),
            format!(
                "create table {TEST_DATABASE_SCHEMA}.events (
                    id bigint primary key,
                    {TEST_IDENTIFIER_COLUMN} bigint,
                    event text,
                    distinct_id text,
                    \"timestamp\" timestamptz,
                    properties text,
                    \"set\" jsonb
                )"
            ),
            format!(
                "create table {TEST_DATABASE_SCHEMA}.exported_events (
                    event_id text not null,
                    exported_at timestamptz not null
                )"
            ),
            format!(
                "create table {TEST_DATABASE_SCHEMA}.import_log (
                    event_at timestamptz not null,
                    message text not null
                )"
            ),
        ] {
            sqlx::query(&statement)
                .execute(&pool)
                .await
                .expect("Failed to create test table");
        }

        migrate_checkpoint_store(&config)
            .await
            .expect("Failed to migrate the checkpoint store");

        Self { config, pool }
    }

    /// Tables of the test database, matching [`crate::test_utils::fixtures::test_import_config`].
    pub fn tables_config(&self) -> TablesConfig {
        TablesConfig {
            table_name: format!("{TEST_DATABASE_SCHEMA}.events"),
            event_log_table_name: format!("{TEST_DATABASE_SCHEMA}.exported_events"),
            import_log_table_name: Some(format!("{TEST_DATABASE_SCHEMA}.import_log")),
            order_by_column: "id".to_owned(),
            identifier_column: TEST_IDENTIFIER_COLUMN.to_owned(),
        }
    }

    /// Inserts rows `first..=last` understood by the default transformation.
    pub async fn insert_events(&self, first: i64, last: i64) {
        sqlx::query(&format!(
            "insert into {TEST_DATABASE_SCHEMA}.events
                (id, {TEST_IDENTIFIER_COLUMN}, event, distinct_id, \"timestamp\", properties)
             select n, n, 'imported_event', 'user-' || n, now(), '{{\"row\": ' || n || '}}'
             from generate_series($1::bigint, $2::bigint) as n"
        ))
        .bind(first)
        .bind(last)
        .execute(&self.pool)
        .await
        .expect("Failed to insert test events");
    }

    /// Inserts rows `first..=last` whose properties payload is not valid JSON.
    pub async fn insert_malformed_events(&self, first: i64, last: i64) {
        sqlx::query(&format!(
            "insert into {TEST_DATABASE_SCHEMA}.events
                (id, {TEST_IDENTIFIER_COLUMN}, event, distinct_id, properties)
             select n, n, 'imported_event', 'user-' || n, '{{\"row\": '
             from generate_series($1::bigint, $2::bigint) as n"
        ))
        .bind(first)
        .bind(last)
        .execute(&self.pool)
        .await
        .expect("Failed to insert malformed test events");
    }

    /// Identifiers in the export log, sorted numerically.
    pub async fn exported_ids(&self) -> Vec<String> {
        sqlx::query_scalar(&format!(
            "select event_id from {TEST_DATABASE_SCHEMA}.exported_events
             order by event_id::bigint"
        ))
        .fetch_all(&self.pool)
        .await
        .expect("Failed to read the export log")
    }

    /// Messages in the import log, oldest first.
    pub async fn import_log(&self) -> Vec<String> {
        sqlx::query_scalar(&format!(
            "select message from {TEST_DATABASE_SCHEMA}.import_log order by event_at"
        ))
        .fetch_all(&self.pool)
        .await
        .expect("Failed to read the import log")
    }

    /// Closes the pool and drops the database.
    pub async fn cleanup(self) {
        self.pool.close().await;
        drop_pg_database(&self.config).await;
    }
}
