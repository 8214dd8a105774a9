use std::sync::Arc;

use config::shared::{ImporterConfig, SinkConfig, StateStoreConfig, http_timeout};
use importer::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use importer::cycle::ImportCycle;
use importer::executor::QueryExecutor;
use importer::executor::postgres::PgQueryExecutor;
use importer::scheduler::{DueTick, ImportScheduler};
use importer::sink::EventSink;
use importer::sink::http::HttpCaptureSink;
use importer::sink::memory::MemorySink;
use importer::store::CheckpointStore;
use importer::store::memory::MemoryCheckpointStore;
use importer::store::postgres::PostgresCheckpointStore;
use postgres::migrations::migrate_checkpoint_store;
use tracing::{error, info, warn};

use crate::config_loader::load_importer_config;

/// How the importer hosts its ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Schedule ticks inside the process until shutdown.
    Continuous,
    /// Run the due ticks once and exit.
    Once,
}

// Statically dispatches scheduler creation and starting.
macro_rules! start_import_dispatch {
    ($config:expr, $store:expr, $sink:expr, $mode:expr) => {{
        let executor = PgQueryExecutor::new(&$config.source);
        let cycle = ImportCycle::new(
            Arc::new($config.import.clone()),
            executor,
            $store.clone(),
            $sink,
        );
        let scheduler = ImportScheduler::new(cycle, $store);
        start_import(scheduler, $mode).await
    }};
}

pub async fn start_importer(mode: RunMode) -> anyhow::Result<()> {
    let config = load_importer_config()?;
    info!(
        import = %config.import.name,
        table = %config.import.tables.table_name,
        progress = ?config.import.progress,
        mechanism = ?config.import.mechanism,
        ?mode,
        "starting importer"
    );

    // Each combination of state store and sink gets its own monomorphized scheduler.
    match &config.state_store {
        StateStoreConfig::Memory => {
            warn!("checkpoints are kept in memory and will be lost on restart");
            let store = MemoryCheckpointStore::new();
            start_with_sink(&config, store, mode).await
        }
        StateStoreConfig::Postgres => {
            migrate_checkpoint_store(&config.source).await?;
            let store = PostgresCheckpointStore::new(config.import.name.clone(), &config.source);
            start_with_sink(&config, store, mode).await
        }
    }
}

async fn start_with_sink<C>(config: &ImporterConfig, store: C, mode: RunMode) -> anyhow::Result<()>
where
    C: CheckpointStore + Clone,
{
    match &config.sink {
        SinkConfig::Memory => {
            let sink = MemorySink::new();
            start_import_dispatch!(config, store, sink, mode)
        }
        SinkConfig::Http {
            url,
            api_key,
            timeout_ms,
        } => {
            let sink = HttpCaptureSink::new(url, api_key.clone(), http_timeout(*timeout_ms))?;
            start_import_dispatch!(config, store, sink, mode)
        }
    }
}

async fn start_import<E, C, S>(
    scheduler: ImportScheduler<E, C, S>,
    mode: RunMode,
) -> anyhow::Result<()>
where
    E: QueryExecutor,
    C: CheckpointStore + Clone,
    S: EventSink,
{
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = tokio::spawn(listen_for_shutdown(shutdown_tx));

    let result = match mode {
        RunMode::Continuous => scheduler.run(shutdown_rx).await,
        RunMode::Once => scheduler.run_due_tick(shutdown_rx).await.map(|due_tick| {
            match due_tick {
                DueTick::NotDue { not_before } => {
                    info!(%not_before, "nothing to do, the next run is not due yet");
                }
                DueTick::Ran { ticks, next } => {
                    info!(ticks, not_before = %next.not_before, "due ticks completed");
                }
                DueTick::Finished => info!("historical import is complete"),
            }
        }),
    };

    // The import is over, the signal listener is no longer needed.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    Ok(())
}

async fn listen_for_shutdown(shutdown_tx: ShutdownTx) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl+c");
        return;
    }

    info!("ctrl+c received, shutting down importer");
    if shutdown_tx.send(()).is_err() {
        warn!("importer already stopped, shutdown signal not delivered");
    }
}
