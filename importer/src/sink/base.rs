use std::future::Future;

use serde_json::{Map, Value};

use crate::error::ImportResult;

/// Receiver of exported events.
///
/// Delivery is fire-and-forget: [`EventSink::capture`] reports nothing back, so a failed delivery
/// is indistinguishable from a successful one for the batch import cycle. Implementations log
/// their own failures.
pub trait EventSink {
    /// Returns the name of the sink.
    fn name() -> &'static str;

    /// Hands one event to the sink.
    fn capture(
        &self,
        event_name: &str,
        properties: &Map<String, Value>,
    ) -> impl Future<Output = ()> + Send;

    /// Flushes and releases whatever the sink holds. The default does nothing.
    fn shutdown(&self) -> impl Future<Output = ImportResult<()>> + Send {
        async { Ok(()) }
    }
}
