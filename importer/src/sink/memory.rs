use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ImportResult;
use crate::sink::EventSink;

/// An event as received by the [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    pub event_name: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<CapturedEvent>,
    shut_down: bool,
}

/// Sink keeping every captured event in memory, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured events in capture order.
    pub async fn events(&self) -> Vec<CapturedEvent> {
        self.inner.lock().await.events.clone()
    }

    pub async fn is_shut_down(&self) -> bool {
        self.inner.lock().await.shut_down
    }

    pub async fn clear(&self) {
        self.inner.lock().await.events.clear();
    }
}

impl EventSink for MemorySink {
    fn name() -> &'static str {
        "memory"
    }

    async fn capture(&self, event_name: &str, properties: &Map<String, Value>) {
        debug!(event_name, "capturing event in memory");

        let mut inner = self.inner.lock().await;
        inner.events.push(CapturedEvent {
            event_name: event_name.to_owned(),
            properties: properties.clone(),
        });
    }

    async fn shutdown(&self) -> ImportResult<()> {
        self.inner.lock().await.shut_down = true;
        Ok(())
    }
}
