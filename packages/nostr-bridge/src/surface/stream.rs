//! Pull-based stream of stored events

use serde_json::Value;

use crate::adapter::Adapter;
use crate::error::Result;
use crate::handle::NativeHandle;

/// Events matched by `Client::stream_events`
///
/// The handle is serialized: concurrent `next` calls on clones run one at a
/// time, each seeing a distinct event.
#[derive(Debug, Clone)]
pub struct EventStream {
    adapter: Adapter,
    handle: NativeHandle,
}

impl EventStream {
    pub(crate) fn new(adapter: Adapter, handle: NativeHandle) -> Self {
        Self { adapter, handle }
    }

    /// Next event, `None` once drained
    pub async fn next(&self) -> Result<Option<Value>> {
        let value = self
            .adapter
            .call_async("event_stream_next", Some(&self.handle), vec![])?
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    /// Release the native stream before it is drained
    pub fn dispose(&self) -> Result<()> {
        self.handle.dispose()
    }
}
