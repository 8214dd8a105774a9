use importer::guard::RunGuard;
use importer::store::postgres::PostgresCheckpointStore;
use importer::store::{CURSOR_KEY, CheckpointStore, load_checkpoint, store_checkpoint};
use importer::test_utils::database::TestDatabase;
use postgres::migrations::migrate_checkpoint_store;
use serde_json::json;
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn checkpoints_are_replaced_in_place() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    let store = PostgresCheckpointStore::with_pool("events".to_owned(), database.pool.clone());

    assert_eq!(store.get(CURSOR_KEY).await.unwrap(), None);

    store_checkpoint(&store, CURSOR_KEY, &10u64).await.unwrap();
    store_checkpoint(&store, CURSOR_KEY, &20u64).await.unwrap();

    assert_eq!(
        load_checkpoint::<_, u64>(&store, CURSOR_KEY).await.unwrap(),
        Some(20)
    );
    let rows: i64 = sqlx::query_scalar("select count(*) from importer.checkpoints")
        .fetch_one(&database.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoints_are_namespaced_by_import_name() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;
    let orders = PostgresCheckpointStore::with_pool("orders".to_owned(), database.pool.clone());
    let events = PostgresCheckpointStore::new("events".to_owned(), &database.config);

    orders.set(CURSOR_KEY, json!(5)).await.unwrap();
    events.set(CURSOR_KEY, json!({"nested": true})).await.unwrap();

    assert_eq!(orders.get(CURSOR_KEY).await.unwrap(), Some(json!(5)));
    assert_eq!(
        events.get(CURSOR_KEY).await.unwrap(),
        Some(json!({"nested": true}))
    );

    // Guards of different imports never block each other.
    let orders_guard = RunGuard::new(orders, None);
    let events_guard = RunGuard::new(events, None);
    assert!(orders_guard.acquire().await.unwrap().is_some());
    assert!(events_guard.acquire().await.unwrap().is_some());
    assert_eq!(orders_guard.acquire().await.unwrap(), None);

    database.cleanup().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_migrations_are_idempotent() {
    init_test_tracing();
    let database = TestDatabase::spawn().await;

    migrate_checkpoint_store(&database.config).await.unwrap();

    let migrations: i64 = sqlx::query_scalar("select count(*) from importer._sqlx_migrations")
        .fetch_one(&database.pool)
        .await
        .unwrap();
    assert_eq!(migrations, 1);

    database.cleanup().await;
}
