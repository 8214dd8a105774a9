use std::time::Duration;

use reqwest::{Client, Url};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};

use config::SerializableSecretString;

use crate::error::{ErrorKind, ImportError, ImportResult};
use crate::import_error;
use crate::sink::EventSink;

/// Body of a capture request.
#[derive(Debug, Serialize)]
struct CaptureRequest<'a> {
    api_key: &'a str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    distinct_id: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a Value>,
    properties: &'a Map<String, Value>,
}

/// Sink posting each event as JSON to an HTTP capture endpoint.
///
/// Responses are not awaited beyond their status: a failed request is logged and dropped.
#[derive(Debug, Clone)]
pub struct HttpCaptureSink {
    client: Client,
    url: Url,
    api_key: SerializableSecretString,
}

impl HttpCaptureSink {
    pub fn new(url: &str, api_key: SerializableSecretString, timeout: Duration) -> ImportResult<Self> {
        let url = Url::parse(url).map_err(|err| {
            import_error!(
                ErrorKind::ConfigError,
                "Invalid sink URL",
                format!("`{url}`: {err}"),
                source: err
            )
        })?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            api_key,
        })
    }

    async fn send(&self, event_name: &str, properties: &Map<String, Value>) -> ImportResult<()> {
        let api_key: &String = self.api_key.expose_secret();
        let request = CaptureRequest {
            api_key,
            event: event_name,
            distinct_id: properties.get("distinct_id"),
            timestamp: properties.get("timestamp"),
            properties,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ImportError::from((
                ErrorKind::SinkDeliveryFailed,
                "Capture endpoint rejected the event",
                format!("status {status}: {body}"),
            )));
        }

        Ok(())
    }
}

impl EventSink for HttpCaptureSink {
    fn name() -> &'static str {
        "http"
    }

    async fn capture(&self, event_name: &str, properties: &Map<String, Value>) {
        match self.send(event_name, properties).await {
            Ok(()) => debug!(event_name, "event captured"),
            Err(err) => error!(event_name, error = %err, "failed to deliver event to capture endpoint"),
        }
    }
}
