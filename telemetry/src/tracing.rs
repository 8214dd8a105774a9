use std::sync::Once;

use config::Environment;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Filter used by [`init_test_tracing`] when `RUST_LOG` is not set.
const DEFAULT_TEST_LOG_FILTER: &str = "importer=debug,info";

static INIT_TEST_TRACING: Once = Once::new();

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Installs the global subscriber of a service.
///
/// Production logs are emitted as JSON lines carrying `service` and `environment` on every event,
/// development logs use the human readable format.
pub fn init_tracing(service_name: &str, environment: Environment) -> Result<(), TracingError> {
    let filter = env_filter(DEFAULT_LOG_FILTER)?;

    if environment.is_prod() {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;
    }

    ::tracing::info!(
        service = service_name,
        environment = %environment,
        "tracing initialized"
    );

    Ok(())
}

/// Installs a test subscriber writing through the test harness capture.
///
/// Safe to call from every test, only the first call installs the subscriber.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter = env_filter(DEFAULT_TEST_LOG_FILTER)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_LOG_FILTER));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

fn env_filter(default: &str) -> Result<EnvFilter, TracingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => Ok(EnvFilter::try_new(directives)?),
        Err(_) => Ok(EnvFilter::try_new(default)?),
    }
}
