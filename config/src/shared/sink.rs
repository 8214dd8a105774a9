use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::base::{ValidationError, require_non_empty};

/// Where exported events are captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    /// Keeps captured events in memory. Only useful for development.
    Memory,
    /// Posts every event as JSON to an HTTP capture endpoint.
    Http {
        /// Full URL of the capture endpoint.
        url: String,
        /// Project API key sent along with every event.
        api_key: SerializableSecretString,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

impl SinkConfig {
    pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SinkConfig::Memory => Ok(()),
            SinkConfig::Http {
                url,
                api_key,
                timeout_ms,
            } => {
                require_non_empty("sink.http.url", url)?;
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ValidationError::invalid(
                        "sink.http.url",
                        "must be an http or https URL",
                    ));
                }
                if api_key.is_empty() {
                    return Err(ValidationError::MissingField("sink.http.api_key"));
                }
                if *timeout_ms == 0 {
                    return Err(ValidationError::invalid(
                        "sink.http.timeout_ms",
                        "must be greater than 0",
                    ));
                }

                Ok(())
            }
        }
    }
}

/// Timeout of a single capture request.
pub fn http_timeout(timeout_ms: u64) -> Duration {
    Duration::from_millis(timeout_ms)
}

fn default_http_timeout_ms() -> u64 {
    SinkConfig::DEFAULT_HTTP_TIMEOUT_MS
}
