//! # Client
//!
//! Relay pool, publishing and subscriptions. Every method is one call into
//! the core; the pool itself lives there.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::{millis, typed, EventStream, Signer};
use crate::adapter::{Adapter, ListenerId};
use crate::contract::HandleKind;
use crate::error::{Error, Result};
use crate::events::HandleNotification;
use crate::handle::NativeHandle;

/// Result of publishing an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventOutput {
    /// Event id (hex)
    pub id: String,
    /// Relays that accepted the event
    pub success: Vec<String>,
    /// Relays that rejected it, with their reason
    #[serde(default)]
    pub failed: HashMap<String, String>,
}

/// Native client
#[derive(Debug, Clone)]
pub struct Client {
    adapter: Adapter,
    handle: NativeHandle,
}

impl Client {
    /// New client, optionally signing with `signer`
    pub fn new(adapter: &Adapter, signer: Option<&Signer>) -> Result<Self> {
        let id = adapter.call("client_new", None, vec![signer.map(Signer::handle).into()])?;
        Ok(Self {
            adapter: adapter.clone(),
            handle: adapter.adopt(HandleKind::Client, &id)?,
        })
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    async fn invoke(&self, function: &str, args: Vec<crate::marshal::CallArg>) -> Result<Value> {
        self.adapter.call_async(function, Some(&self.handle), args)?.await
    }

    // ------------------------------------------------------------------------
    // Relays
    // ------------------------------------------------------------------------

    /// Add a relay; false if it was already in the pool
    pub async fn add_relay(&self, url: &str) -> Result<bool> {
        let value = self.invoke("client_add_relay", vec![url.into()]).await?;
        typed("client_add_relay", value)
    }

    pub async fn remove_relay(&self, url: &str) -> Result<()> {
        self.invoke("client_remove_relay", vec![url.into()]).await?;
        Ok(())
    }

    /// Relay URLs in the pool
    pub async fn relays(&self) -> Result<Vec<String>> {
        let value = self.invoke("client_relays", vec![]).await?;
        typed("client_relays", value)
    }

    pub async fn connect(&self) -> Result<()> {
        self.invoke("client_connect", vec![]).await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.invoke("client_disconnect", vec![]).await?;
        Ok(())
    }

    /// Wait until at least one relay is connected, or fail with the core's
    /// timeout kind
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        self.invoke("client_wait_for_connection", vec![millis(timeout).into()])
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Publish a raw event
    ///
    /// Missing `pubkey`, `created_at` and `tags` are filled in by the core
    /// from the client's signer.
    pub async fn send_event(&self, event: Value) -> Result<SendEventOutput> {
        let value = self.invoke("client_send_event", vec![event.into()]).await?;
        typed("client_send_event", value)
    }

    /// Stored events matching `filter`
    pub async fn fetch_events(&self, filter: Value, timeout: Duration) -> Result<Vec<Value>> {
        let value = self
            .invoke("client_fetch_events", vec![filter.into(), millis(timeout).into()])
            .await?;
        typed("client_fetch_events", value)
    }

    /// Like `fetch_events`, pulled one event at a time
    pub async fn stream_events(&self, filter: Value, timeout: Duration) -> Result<EventStream> {
        let value = self
            .invoke("client_stream_events", vec![filter.into(), millis(timeout).into()])
            .await?;
        let handle = self.adapter.adopt(HandleKind::EventStream, &value)?;
        Ok(EventStream::new(self.adapter.clone(), handle))
    }

    /// Open a subscription; matching events arrive as notifications
    pub async fn subscribe(&self, filter: Value) -> Result<String> {
        let value = self.invoke("client_subscribe", vec![filter.into()]).await?;
        typed("client_subscribe", value)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.invoke("client_unsubscribe", vec![subscription_id.into()])
            .await?;
        Ok(())
    }

    /// Shut the client down; later calls fail with the core's shutdown kind
    pub async fn shutdown(&self) -> Result<()> {
        self.invoke("client_shutdown", vec![]).await?;
        Ok(())
    }

    pub fn automatic_authentication(&self, enable: bool) -> Result<()> {
        self.adapter
            .call("client_automatic_authentication", Some(&self.handle), vec![enable.into()])?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Feed this client's notifications to `handler` until it shuts down
    ///
    /// Several listeners may run at once; each stops on this client's own
    /// shutdown. Dropping the future unregisters the handler.
    pub async fn handle_notifications<H>(&self, handler: H) -> Result<()>
    where
        H: HandleNotification + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let listener = self.adapter.add_client_listener(
            &self.handle,
            Arc::new(UntilShutdown {
                handler,
                done: Mutex::new(Some(tx)),
            }),
        );
        let _registration = Registration {
            adapter: &self.adapter,
            listener,
        };

        rx.await
            .map_err(|_| Error::CoreUnavailable("notification listener dropped".into()))
    }

    /// Release the native client now instead of on last drop
    pub fn dispose(&self) -> Result<()> {
        self.handle.dispose()
    }
}

/// Unregisters a client listener when `handle_notifications` ends
struct Registration<'a> {
    adapter: &'a Adapter,
    listener: ListenerId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.adapter.remove_client_listener(self.listener);
    }
}

/// Forwards to the host handler and signals the first shutdown
struct UntilShutdown<H> {
    handler: H,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl<H: HandleNotification> HandleNotification for UntilShutdown<H> {
    fn handle_msg(&self, relay_url: &str, message: &Value) {
        self.handler.handle_msg(relay_url, message);
    }

    fn handle(&self, relay_url: &str, subscription_id: &str, event: &Value) {
        self.handler.handle(relay_url, subscription_id, event);
    }

    fn shutdown(&self) {
        self.handler.shutdown();
        if let Some(tx) = self.done.lock().take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::nostr_sdk::kinds;
    use crate::surface::tests::{adapter, SECRET};
    use serde_json::json;

    const RELAY: &str = "wss://relay.damus.io";

    async fn connected(adapter: &Adapter) -> Client {
        let signer = Signer::from_secret_key(adapter, SECRET).unwrap();
        let client = Client::new(adapter, Some(&signer)).unwrap();
        client.add_relay(RELAY).await.unwrap();
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_relay_pool() {
        let adapter = adapter();
        let client = Client::new(&adapter, None).unwrap();

        assert!(client.add_relay(RELAY).await.unwrap());
        assert!(!client.add_relay(RELAY).await.unwrap());
        assert_eq!(client.relays().await.unwrap(), vec![RELAY.to_string()]);

        let err = client.remove_relay("wss://nope.example").await.unwrap_err();
        assert_eq!(err.native_kind(), Some(kinds::RELAY_NOT_FOUND));

        client.remove_relay(RELAY).await.unwrap();
        assert!(client.relays().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let adapter = adapter();
        let client = Client::new(&adapter, None).unwrap();
        let err = client.add_relay("http://relay").await.unwrap_err();
        assert_eq!(err.native_kind(), Some(kinds::INVALID_URL));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_wait_for_connection() {
        let adapter = adapter();
        let client = Client::new(&adapter, None).unwrap();
        let err = client
            .wait_for_connection(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.native_kind(), Some(kinds::TIMEOUT));

        let client = connected(&adapter).await;
        client.wait_for_connection(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_then_fetch() {
        let adapter = adapter();
        let client = connected(&adapter).await;

        let output = client
            .send_event(json!({ "kind": 1, "content": "gm" }))
            .await
            .unwrap();
        assert_eq!(output.success, vec![RELAY.to_string()]);
        assert!(output.failed.is_empty());

        let events = client
            .fetch_events(json!({ "kinds": [1] }), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], json!(output.id));
    }

    #[tokio::test]
    async fn test_send_without_signer() {
        let adapter = adapter();
        let client = Client::new(&adapter, None).unwrap();
        client.add_relay(RELAY).await.unwrap();
        let err = client
            .send_event(json!({ "kind": 1, "content": "gm" }))
            .await
            .unwrap_err();
        assert_eq!(err.native_kind(), Some(kinds::SIGNER));
    }

    #[tokio::test]
    async fn test_stream_events() {
        let adapter = adapter();
        let client = connected(&adapter).await;
        for i in 0..3 {
            client
                .send_event(json!({ "kind": 1, "content": format!("note {}", i) }))
                .await
                .unwrap();
        }

        let stream = client
            .stream_events(json!({ "kinds": [1] }), Duration::from_secs(1))
            .await
            .unwrap();
        let mut seen = 0;
        while let Some(event) = stream.next().await.unwrap() {
            assert_eq!(event["kind"], json!(1));
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stream_reads_are_distinct() {
        let adapter = adapter();
        let client = connected(&adapter).await;
        for i in 0..20 {
            client
                .send_event(json!({ "kind": 1, "content": format!("n{}", i) }))
                .await
                .unwrap();
        }
        let stream = client
            .stream_events(json!({}), Duration::from_secs(1))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let stream = stream.clone();
            tasks.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                while let Some(event) = stream.next().await.unwrap() {
                    ids.push(event["id"].as_str().unwrap().to_string());
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn test_shutdown_then_calls_fail() {
        let adapter = adapter();
        let client = connected(&adapter).await;
        client.shutdown().await.unwrap();
        let err = client.connect().await.unwrap_err();
        assert_eq!(err.native_kind(), Some(kinds::SHUTDOWN));
    }

    #[tokio::test]
    async fn test_automatic_authentication() {
        let adapter = adapter();
        let client = Client::new(&adapter, None).unwrap();
        client.automatic_authentication(false).unwrap();
        assert_eq!(adapter.stats().calls, 2);
    }

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<(String, Value)>>,
        messages: Mutex<Vec<String>>,
    }

    impl HandleNotification for Collector {
        fn handle_msg(&self, relay_url: &str, _message: &Value) {
            self.messages.lock().push(relay_url.to_string());
        }

        fn handle(&self, _relay_url: &str, subscription_id: &str, event: &Value) {
            self.events.lock().push((subscription_id.to_string(), event.clone()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handle_notifications_until_shutdown() {
        let adapter = adapter();
        let client = connected(&adapter).await;
        let sub = client.subscribe(json!({ "kinds": [1] })).await.unwrap();

        let collector = Arc::new(Collector::default());
        let listener = {
            let client = client.clone();
            let collector = collector.clone();
            tokio::spawn(async move { client.handle_notifications(collector).await })
        };
        // Handler must be installed before publishing.
        tokio::time::sleep(Duration::from_millis(50)).await;

        client
            .send_event(json!({ "kind": 1, "content": "to subscribers" }))
            .await
            .unwrap();
        client
            .send_event(json!({ "kind": 7, "content": "+" }))
            .await
            .unwrap();
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let events = collector.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, sub);
        assert_eq!(events[0].1["content"], json!("to subscribers"));
        assert_eq!(collector.messages.lock().clone(), vec![RELAY.to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handle_notifications_is_scoped_to_its_client() {
        let adapter = adapter();
        let a = connected(&adapter).await;
        let b = connected(&adapter).await;
        a.subscribe(json!({ "kinds": [1] })).await.unwrap();

        let collector = Arc::new(Collector::default());
        let listener = {
            let b = b.clone();
            let collector = collector.clone();
            tokio::spawn(async move { b.handle_notifications(collector).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        a.send_event(json!({ "kind": 1, "content": "for a only" }))
            .await
            .unwrap();
        a.connect().await.unwrap();
        a.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!listener.is_finished());
        assert!(collector.events.lock().is_empty());
        assert!(collector.messages.lock().is_empty());

        b.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_listeners_on_one_client() {
        let adapter = adapter();
        let client = connected(&adapter).await;
        client.subscribe(json!({ "kinds": [1] })).await.unwrap();

        let first = Arc::new(Collector::default());
        let second = Arc::new(Collector::default());
        let spawn = |collector: Arc<Collector>| {
            let client = client.clone();
            tokio::spawn(async move { client.handle_notifications(collector).await })
        };
        let first_listener = spawn(first.clone());
        let second_listener = spawn(second.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        client
            .send_event(json!({ "kind": 1, "content": "both" }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.shutdown().await.unwrap();

        for listener in [first_listener, second_listener] {
            tokio::time::timeout(Duration::from_secs(5), listener)
                .await
                .unwrap()
                .unwrap()
                .unwrap();
        }
        assert_eq!(first.events.lock().len(), 1);
        assert_eq!(second.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_listener_unregisters() {
        let adapter = adapter();
        let client = connected(&adapter).await;
        let listener = client.handle_notifications(Arc::new(Collector::default()));
        assert!(tokio::time::timeout(Duration::from_millis(20), listener)
            .await
            .is_err());
        assert_eq!(adapter.stats().listeners, 0);
    }

    #[tokio::test]
    async fn test_dispose_client() {
        let adapter = adapter();
        let client = Client::new(&adapter, None).unwrap();
        client.dispose().unwrap();
        assert_eq!(client.dispose(), Err(Error::DoubleFree(client.handle().id())));
        let err = client.add_relay(RELAY).await.unwrap_err();
        assert_eq!(err, Error::UseAfterFree(client.handle().id()));
        assert_eq!(adapter.stats().frees, 1);
    }
}
