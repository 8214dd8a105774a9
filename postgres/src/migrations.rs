use config::shared::{IntoConnectOptions, PgConnectionConfig};
use sqlx::Executor;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

const NUM_POOL_CONNECTIONS: u32 = 1;

/// Creates the `importer` schema and its checkpoint table in the source database.
pub async fn migrate_checkpoint_store(config: &PgConnectionConfig) -> Result<(), sqlx::Error> {
    let options: PgConnectOptions = config.with_db();

    let pool = PgPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .min_connections(NUM_POOL_CONNECTIONS)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists importer;").await?;
                // Keeps the `_sqlx_migrations` table inside the importer schema.
                conn.execute("set search_path = 'importer';").await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    pool.close().await;

    Ok(())
}
