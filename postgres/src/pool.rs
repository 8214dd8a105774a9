use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};

/// Creates a pool for the source database that opens its first connection on first use.
///
/// Construction never fails on an unreachable server, connection errors surface on the first
/// query instead.
pub fn connect_to_source_database_lazy(
    config: &PgConnectionConfig,
    max_connections: u32,
) -> PgPool {
    let options: PgConnectOptions = config.with_db();

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy_with(options)
}
