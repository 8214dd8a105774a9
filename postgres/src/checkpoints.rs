use chrono::{DateTime, Utc};
use sqlx::{PgPool, prelude::FromRow};

/// A row of the `importer.checkpoints` table.
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub import_name: String,
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Fetches the checkpoint stored under `key` for the import named `import_name`.
pub async fn get_checkpoint(
    pool: &PgPool,
    import_name: &str,
    key: &str,
) -> sqlx::Result<Option<CheckpointRow>> {
    sqlx::query_as::<_, CheckpointRow>(
        r#"
        select import_name, key, value, updated_at
        from importer.checkpoints
        where import_name = $1 and key = $2
        "#,
    )
    .bind(import_name)
    .bind(key)
    .fetch_optional(pool)
    .await
}

/// Inserts or replaces the checkpoint stored under `key`.
pub async fn upsert_checkpoint(
    pool: &PgPool,
    import_name: &str,
    key: &str,
    value: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into importer.checkpoints (import_name, key, value, updated_at)
        values ($1, $2, $3, now())
        on conflict (import_name, key)
        do update set value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(import_name)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
