//! # Loopback Core
//!
//! An in-memory core implementing the `nostr_sdk` contract without any
//! networking. Relays are just URLs; every client publishes into one shared
//! event store, and subscriptions are fed from it.
//!
//! Only compiled with the `loopback` feature (and in unit tests). Used by
//! the conformance tests, the CLI `probe` self-check, and (behind
//! `loopback-export`) as a C ABI artifact that host adapters can load
//! without a real engine.
//!
//! Every notification payload carries the `client` handle it belongs to.
//!
//! ```text
//!  client_send_event ──► store ──► matching subscriptions ──► "event" notification
//!                          │
//!                          └──► client_fetch_events / client_stream_events
//! ```
//!
//! Event ids are SHA-256 over the usual `[0, pubkey, created_at, kind, tags,
//! content]` array. Signer public keys are a stand-in derived from the secret
//! key by hashing; nothing here is real cryptography.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::embedded::{EmbeddedCoreBuilder, EventEmitter, HandlerResult, Invocation, NativeFailure};
use super::EmbeddedCore;
use crate::contract::nostr_sdk::{self, kinds};
use crate::error::Result;

/// Notification topics emitted by the loopback core
pub mod topics {
    pub const MESSAGE: &str = "message";
    pub const EVENT: &str = "event";
    pub const SHUTDOWN: &str = "shutdown";
}

struct ClientState {
    signer: Option<String>,
    relays: Mutex<BTreeSet<String>>,
    connected: AtomicBool,
    shut_down: AtomicBool,
    auto_auth: AtomicBool,
    subscriptions: Mutex<HashMap<String, Value>>,
}

struct Loopback {
    next_handle: AtomicU64,
    next_subscription: AtomicU64,
    clients: DashMap<u64, Arc<ClientState>>,
    signers: DashMap<u64, String>,
    streams: DashMap<u64, Arc<Mutex<VecDeque<Value>>>>,
    store: Mutex<Vec<Value>>,
    events: EventEmitter,
}

fn fail(kind: i32, message: impl Into<String>) -> NativeFailure {
    NativeFailure::new(kind, message)
}

impl Loopback {
    fn new(events: EventEmitter) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
            clients: DashMap::new(),
            signers: DashMap::new(),
            streams: DashMap::new(),
            store: Mutex::new(Vec::new()),
            events,
        }
    }

    fn allocate(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn client(&self, handle: u64) -> std::result::Result<Arc<ClientState>, NativeFailure> {
        let client = self
            .clients
            .get(&handle)
            .map(|c| c.clone())
            .ok_or_else(|| fail(kinds::GENERIC, format!("unknown client {}", handle)))?;
        if client.shut_down.load(Ordering::SeqCst) {
            return Err(fail(kinds::SHUTDOWN, "client has been shut down"));
        }
        Ok(client)
    }

    fn free(&self, handle: u64) -> bool {
        self.clients.remove(&handle).is_some()
            || self.signers.remove(&handle).is_some()
            || self.streams.remove(&handle).is_some()
    }

    // ------------------------------------------------------------------------
    // Client
    // ------------------------------------------------------------------------

    fn client_new(&self, inv: Invocation) -> HandlerResult {
        let signer = match inv.opt_u64(0) {
            Some(id) => Some(
                self.signers
                    .get(&id)
                    .map(|pk| pk.clone())
                    .ok_or_else(|| fail(kinds::SIGNER, format!("unknown signer {}", id)))?,
            ),
            None => None,
        };

        let handle = self.allocate();
        self.clients.insert(
            handle,
            Arc::new(ClientState {
                signer,
                relays: Mutex::new(BTreeSet::new()),
                connected: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                auto_auth: AtomicBool::new(true),
                subscriptions: Mutex::new(HashMap::new()),
            }),
        );
        tracing::debug!(handle, "Loopback client created");
        Ok(json!(handle))
    }

    fn add_relay(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        let url = validate_url(inv.str(0)?)?;
        let inserted = client.relays.lock().insert(url);
        Ok(json!(inserted))
    }

    fn remove_relay(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        let url = inv.str(0)?;
        if !client.relays.lock().remove(url) {
            return Err(fail(kinds::RELAY_NOT_FOUND, format!("relay {} not found", url)));
        }
        Ok(Value::Null)
    }

    fn relays(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        let relays: Vec<String> = client.relays.lock().iter().cloned().collect();
        Ok(json!(relays))
    }

    fn connect(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        client.connected.store(true, Ordering::SeqCst);
        let relays: Vec<String> = client.relays.lock().iter().cloned().collect();
        for relay in relays {
            self.events.emit(
                topics::MESSAGE,
                &json!({ "client": inv.handle, "relay_url": relay, "message": ["NOTICE", "connected"] }),
            );
        }
        Ok(Value::Null)
    }

    fn disconnect(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        client.connected.store(false, Ordering::SeqCst);
        Ok(Value::Null)
    }

    async fn wait_for_connection(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        await_connected(&client, inv.u64(0)?).await?;
        Ok(Value::Null)
    }

    fn send_event(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        let relays: Vec<String> = client.relays.lock().iter().cloned().collect();
        if relays.is_empty() {
            return Err(fail(kinds::RELAY_NOT_FOUND, "no relays specified"));
        }

        let mut event = validate_event(inv.arg(0))?;
        if event.get("pubkey").map_or(true, Value::is_null) {
            let pubkey = client
                .signer
                .clone()
                .ok_or_else(|| fail(kinds::SIGNER, "signer not configured"))?;
            event["pubkey"] = json!(pubkey);
        }
        if event.get("tags").map_or(true, Value::is_null) {
            event["tags"] = json!([]);
        }
        if event.get("created_at").map_or(true, Value::is_null) {
            event["created_at"] = json!(unix_now());
        }
        let id = event_id(&event);
        event["id"] = json!(id);

        self.store.lock().push(event.clone());
        self.dispatch(&event);

        Ok(json!({ "id": id, "success": relays, "failed": {} }))
    }

    fn dispatch(&self, event: &Value) {
        for entry in self.clients.iter() {
            let owner = *entry.key();
            let client = entry.value();
            let relay = client.relays.lock().iter().next().cloned();
            let Some(relay) = relay else { continue };
            for (subscription_id, filter) in client.subscriptions.lock().iter() {
                if matches_filter(filter, event) {
                    self.events.emit(
                        topics::EVENT,
                        &json!({
                            "client": owner,
                            "relay_url": relay,
                            "subscription_id": subscription_id,
                            "event": event,
                        }),
                    );
                }
            }
        }
    }

    fn query(&self, filter: &Value) -> std::result::Result<Vec<Value>, NativeFailure> {
        let filter = validate_filter(filter)?;
        let limit = filter.get("limit").and_then(Value::as_u64).map(|l| l as usize);
        let store = self.store.lock();
        let mut found: Vec<Value> = store
            .iter()
            .rev()
            .filter(|event| matches_filter(filter, event))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn fetch_events(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        if client.relays.lock().is_empty() {
            return Err(fail(kinds::RELAY_NOT_FOUND, "no relays specified"));
        }
        await_connected(&client, inv.u64(1)?).await?;
        Ok(Value::Array(self.query(inv.arg(0))?))
    }

    async fn stream_events(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        if client.relays.lock().is_empty() {
            return Err(fail(kinds::RELAY_NOT_FOUND, "no relays specified"));
        }
        await_connected(&client, inv.u64(1)?).await?;
        let events = self.query(inv.arg(0))?;
        let handle = self.allocate();
        self.streams.insert(handle, Arc::new(Mutex::new(events.into())));
        Ok(json!(handle))
    }

    fn subscribe(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        let filter = validate_filter(inv.arg(0))?.clone();
        let id = format!("sub-{}", self.next_subscription.fetch_add(1, Ordering::Relaxed));
        client.subscriptions.lock().insert(id.clone(), filter);
        Ok(json!(id))
    }

    fn unsubscribe(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        client.subscriptions.lock().remove(inv.str(0)?);
        Ok(Value::Null)
    }

    fn shutdown(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        client.connected.store(false, Ordering::SeqCst);
        client.subscriptions.lock().clear();
        client.shut_down.store(true, Ordering::SeqCst);
        self.events.emit(topics::SHUTDOWN, &json!({ "client": inv.handle }));
        Ok(Value::Null)
    }

    fn automatic_authentication(&self, inv: Invocation) -> HandlerResult {
        let client = self.client(inv.handle)?;
        client.auto_auth.store(inv.bool(0)?, Ordering::SeqCst);
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------------
    // Signer, stream, free functions
    // ------------------------------------------------------------------------

    fn signer_from_secret_key(&self, inv: Invocation) -> HandlerResult {
        let secret = inv.str(0)?;
        if secret.len() != 64 || hex::decode(secret).is_err() {
            return Err(fail(kinds::SIGNER, "invalid secret key"));
        }
        let public_key = hex::encode(Sha256::digest(secret.to_ascii_lowercase().as_bytes()));
        let handle = self.allocate();
        self.signers.insert(handle, public_key);
        Ok(json!(handle))
    }

    fn signer_public_key(&self, inv: Invocation) -> HandlerResult {
        self.signers
            .get(&inv.handle)
            .map(|pk| json!(pk.clone()))
            .ok_or_else(|| fail(kinds::SIGNER, format!("unknown signer {}", inv.handle)))
    }

    fn stream_next(&self, inv: Invocation) -> HandlerResult {
        let stream = self
            .streams
            .get(&inv.handle)
            .map(|s| s.clone())
            .ok_or_else(|| fail(kinds::GENERIC, format!("unknown stream {}", inv.handle)))?;
        let next = stream.lock().pop_front();
        Ok(next.unwrap_or(Value::Null))
    }
}

/// Waits until the client is connected to at least one relay
async fn await_connected(client: &ClientState, timeout_ms: u64) -> std::result::Result<(), NativeFailure> {
    let ready = || client.connected.load(Ordering::SeqCst) && !client.relays.lock().is_empty();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while !ready() {
        if tokio::time::Instant::now() >= deadline {
            return Err(fail(kinds::TIMEOUT, "timed out waiting for connection"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

fn init_logger(inv: Invocation) -> HandlerResult {
    let level: crate::logging::LogLevel = inv
        .str(0)?
        .parse()
        .map_err(|e: crate::error::Error| fail(kinds::GENERIC, e.to_string()))?;
    crate::logging::init_logger(level);
    Ok(Value::Null)
}

fn validate_url(url: &str) -> std::result::Result<String, NativeFailure> {
    let rest = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .ok_or_else(|| fail(kinds::INVALID_URL, format!("unsupported relay url: {}", url)))?;
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(fail(kinds::INVALID_URL, format!("invalid relay url: {}", url)));
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn validate_event(event: &Value) -> std::result::Result<Value, NativeFailure> {
    if !event.is_object() {
        return Err(fail(kinds::INVALID_EVENT, "event must be a JSON object"));
    }
    if !event.get("kind").map_or(false, Value::is_u64) {
        return Err(fail(kinds::INVALID_EVENT, "event kind missing"));
    }
    if !event.get("content").map_or(false, Value::is_string) {
        return Err(fail(kinds::INVALID_EVENT, "event content missing"));
    }
    Ok(event.clone())
}

fn validate_filter(filter: &Value) -> std::result::Result<&Value, NativeFailure> {
    if !filter.is_object() {
        return Err(fail(kinds::INVALID_FILTER, "filter must be a JSON object"));
    }
    for key in ["ids", "authors", "kinds"] {
        if filter.get(key).map_or(false, |v| !v.is_array()) {
            return Err(fail(kinds::INVALID_FILTER, format!("`{}` must be an array", key)));
        }
    }
    Ok(filter)
}

/// `ids`, `authors` and `kinds` only; absent fields match everything
fn matches_filter(filter: &Value, event: &Value) -> bool {
    ["ids", "authors", "kinds"].iter().all(|key| {
        let field = match *key {
            "ids" => "id",
            "authors" => "pubkey",
            _ => "kind",
        };
        match filter.get(*key).and_then(Value::as_array) {
            Some(allowed) => event.get(field).map_or(false, |v| allowed.contains(v)),
            None => true,
        }
    })
}

fn event_id(event: &Value) -> String {
    let canonical = json!([
        0,
        event["pubkey"],
        event["created_at"],
        event["kind"],
        event["tags"],
        event["content"],
    ]);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// WIRING
// ============================================================================

fn route_sync<F>(builder: EmbeddedCoreBuilder, state: &Arc<Loopback>, name: &str, f: F) -> EmbeddedCoreBuilder
where
    F: Fn(&Loopback, Invocation) -> HandlerResult + Send + Sync + 'static,
{
    let state = state.clone();
    builder.on_sync(name, move |inv| f(&state, inv))
}

fn route_async<F, Fut>(builder: EmbeddedCoreBuilder, state: &Arc<Loopback>, name: &str, f: F) -> EmbeddedCoreBuilder
where
    F: Fn(Arc<Loopback>, Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let state = state.clone();
    builder.on_async(name, move |inv| f(state.clone(), inv))
}

/// Builder with every `nostr_sdk` function routed to the loopback state
///
/// Tests tweak the builder (e.g. the reported version) before building.
pub fn builder() -> EmbeddedCoreBuilder {
    let builder = EmbeddedCore::builder(nostr_sdk::contract());
    let state = Arc::new(Loopback::new(builder.emitter()));

    let free_state = state.clone();
    let builder = builder.on_free(move |handle| free_state.free(handle));

    let builder = route_sync(builder, &state, "client_new", Loopback::client_new);
    let builder = route_async(builder, &state, "client_add_relay", |s, inv| async move { s.add_relay(inv) });
    let builder = route_async(builder, &state, "client_remove_relay", |s, inv| async move { s.remove_relay(inv) });
    let builder = route_async(builder, &state, "client_relays", |s, inv| async move { s.relays(inv) });
    let builder = route_async(builder, &state, "client_connect", |s, inv| async move { s.connect(inv) });
    let builder = route_async(builder, &state, "client_disconnect", |s, inv| async move { s.disconnect(inv) });
    let builder = route_async(builder, &state, "client_wait_for_connection", |s, inv| async move {
        s.wait_for_connection(inv).await
    });
    let builder = route_async(builder, &state, "client_send_event", |s, inv| async move { s.send_event(inv) });
    let builder = route_async(builder, &state, "client_fetch_events", |s, inv| async move {
        s.fetch_events(inv).await
    });
    let builder = route_async(builder, &state, "client_stream_events", |s, inv| async move {
        s.stream_events(inv).await
    });
    let builder = route_async(builder, &state, "client_subscribe", |s, inv| async move { s.subscribe(inv) });
    let builder = route_async(builder, &state, "client_unsubscribe", |s, inv| async move { s.unsubscribe(inv) });
    let builder = route_async(builder, &state, "client_shutdown", |s, inv| async move { s.shutdown(inv) });
    let builder = route_sync(builder, &state, "client_automatic_authentication", Loopback::automatic_authentication);
    let builder = route_sync(builder, &state, "signer_from_secret_key", Loopback::signer_from_secret_key);
    let builder = route_async(builder, &state, "signer_public_key", |s, inv| async move { s.signer_public_key(inv) });
    let builder = route_async(builder, &state, "event_stream_next", |s, inv| async move { s.stream_next(inv) });

    builder
        .on_sync("init_logger", init_logger)
        .on_sync("git_hash_version", |_| Ok(json!(crate::git_hash_version())))
}

/// The loopback core, ready to load
pub fn core() -> Result<EmbeddedCore> {
    builder().build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CallDescriptor;
    use crate::envelope::Envelope;
    use crate::native::NativeCore;

    const SECRET: &str = "6b911fd37cdf5c81d4c0adb1ab7fa822ed253ab0ad9aa18d77257c88b29b718e";

    fn call(core: &EmbeddedCore, name: &str, handle: Option<u64>, args: Value) -> Envelope {
        let f = nostr_sdk::contract().function(name).unwrap();
        let d = CallDescriptor::new(f.selector, name, handle, args.to_string().into_bytes(), f.returns.clone());
        if !f.is_async {
            return core.call(&d);
        }
        let (tx, rx) = std::sync::mpsc::channel();
        core.call_async(&d, 1, Box::new(move |e| {
            let _ = tx.send(e);
        }))
        .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn value(envelope: Envelope) -> Value {
        envelope.into_value().unwrap()
    }

    fn native_kind(envelope: Envelope) -> i32 {
        match envelope {
            Envelope::Failure { kind, .. } => kind,
            other => panic!("expected failure, got {:?}", other),
        }
    }

    fn client_with_relay(core: &EmbeddedCore) -> u64 {
        let signer = value(call(core, "signer_from_secret_key", None, json!([SECRET])));
        let client = value(call(core, "client_new", None, json!([signer]))).as_u64().unwrap();
        call(core, "client_add_relay", Some(client), json!(["wss://relay.damus.io"]));
        call(core, "client_connect", Some(client), json!([]));
        client
    }

    #[test]
    fn test_add_and_remove_relays() {
        let core = core().unwrap();
        let client = value(call(&core, "client_new", None, json!([null]))).as_u64().unwrap();

        assert_eq!(value(call(&core, "client_add_relay", Some(client), json!(["wss://a.example"]))), json!(true));
        assert_eq!(value(call(&core, "client_add_relay", Some(client), json!(["wss://a.example"]))), json!(false));
        assert_eq!(
            native_kind(call(&core, "client_add_relay", Some(client), json!(["https://nope"]))),
            kinds::INVALID_URL
        );
        assert_eq!(value(call(&core, "client_relays", Some(client), json!([]))), json!(["wss://a.example"]));
        assert_eq!(
            native_kind(call(&core, "client_remove_relay", Some(client), json!(["wss://b.example"]))),
            kinds::RELAY_NOT_FOUND
        );
    }

    #[test]
    fn test_send_and_fetch() {
        let core = core().unwrap();
        let client = client_with_relay(&core);

        let output = value(call(
            &core,
            "client_send_event",
            Some(client),
            json!([{ "kind": 1, "content": "hello", "created_at": 1700000000 }]),
        ));
        let id = output["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 64);

        let events = value(call(&core, "client_fetch_events", Some(client), json!([{ "kinds": [1] }, 1000])));
        assert_eq!(events.as_array().unwrap().len(), 1);
        assert_eq!(events[0]["id"], json!(id));

        let none = value(call(&core, "client_fetch_events", Some(client), json!([{ "kinds": [7] }, 1000])));
        assert!(none.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_send_event_validation() {
        let core = core().unwrap();
        let client = client_with_relay(&core);
        assert_eq!(
            native_kind(call(&core, "client_send_event", Some(client), json!([{ "content": "no kind" }]))),
            kinds::INVALID_EVENT
        );

        let bare = value(call(&core, "client_new", None, json!([null]))).as_u64().unwrap();
        assert_eq!(
            native_kind(call(&core, "client_send_event", Some(bare), json!([{ "kind": 1, "content": "" }]))),
            kinds::RELAY_NOT_FOUND
        );
    }

    #[test]
    fn test_stream_drains_then_null() {
        let core = core().unwrap();
        let client = client_with_relay(&core);
        for i in 0..2 {
            call(&core, "client_send_event", Some(client), json!([{ "kind": 1, "content": format!("n{}", i) }]));
        }
        let stream = value(call(&core, "client_stream_events", Some(client), json!([{}, 1000])))
            .as_u64()
            .unwrap();
        assert!(value(call(&core, "event_stream_next", Some(stream), json!([]))).is_object());
        assert!(value(call(&core, "event_stream_next", Some(stream), json!([]))).is_object());
        assert!(value(call(&core, "event_stream_next", Some(stream), json!([]))).is_null());
    }

    #[test]
    fn test_wait_for_connection_times_out() {
        let core = core().unwrap();
        let client = value(call(&core, "client_new", None, json!([null]))).as_u64().unwrap();
        assert_eq!(
            native_kind(call(&core, "client_wait_for_connection", Some(client), json!([20]))),
            kinds::TIMEOUT
        );
    }

    #[test]
    fn test_fetch_and_stream_honor_timeout() {
        let core = core().unwrap();
        let client = value(call(&core, "client_new", None, json!([null]))).as_u64().unwrap();
        assert_eq!(
            native_kind(call(&core, "client_fetch_events", Some(client), json!([{}, 20]))),
            kinds::RELAY_NOT_FOUND
        );

        call(&core, "client_add_relay", Some(client), json!(["wss://a.example"]));
        let started = std::time::Instant::now();
        assert_eq!(
            native_kind(call(&core, "client_fetch_events", Some(client), json!([{}, 20]))),
            kinds::TIMEOUT
        );
        assert_eq!(
            native_kind(call(&core, "client_stream_events", Some(client), json!([{}, 20]))),
            kinds::TIMEOUT
        );
        assert!(started.elapsed() >= Duration::from_millis(40));

        call(&core, "client_connect", Some(client), json!([]));
        assert!(value(call(&core, "client_fetch_events", Some(client), json!([{}, 20]))).is_array());
    }

    #[test]
    fn test_notifications_name_their_client() {
        let core = core().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        core.set_event_sink(Some(Arc::new(move |topic: &str, payload: &[u8]| {
            let _ = tx.send((topic.to_string(), serde_json::from_slice::<Value>(payload).unwrap()));
        })));

        let client = client_with_relay(&core);
        let (topic, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(topic, topics::MESSAGE);
        assert_eq!(payload["client"], json!(client));

        call(&core, "client_shutdown", Some(client), json!([]));
        let (topic, payload) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(topic, topics::SHUTDOWN);
        assert_eq!(payload, json!({ "client": client }));
    }

    #[test]
    fn test_shutdown_blocks_further_calls() {
        let core = core().unwrap();
        let client = client_with_relay(&core);
        call(&core, "client_shutdown", Some(client), json!([]));
        assert_eq!(
            native_kind(call(&core, "client_connect", Some(client), json!([]))),
            kinds::SHUTDOWN
        );
    }

    #[test]
    fn test_signer() {
        let core = core().unwrap();
        assert_eq!(
            native_kind(call(&core, "signer_from_secret_key", None, json!(["nsec-nope"]))),
            kinds::SIGNER
        );
        let signer = value(call(&core, "signer_from_secret_key", None, json!([SECRET])))
            .as_u64()
            .unwrap();
        let pk = value(call(&core, "signer_public_key", Some(signer), json!([])));
        assert_eq!(pk.as_str().unwrap().len(), 64);
        assert!(core.free_handle(signer).is_ok());
        assert!(core.free_handle(signer).is_err());
    }

    #[test]
    fn test_subscription_emits_event_notification() {
        let core = core().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        core.set_event_sink(Some(Arc::new(move |topic: &str, payload: &[u8]| {
            if topic == topics::EVENT {
                let _ = tx.send(serde_json::from_slice::<Value>(payload).unwrap());
            }
        })));

        let client = client_with_relay(&core);
        let sub = value(call(&core, "client_subscribe", Some(client), json!([{ "kinds": [1] }])));
        call(&core, "client_send_event", Some(client), json!([{ "kind": 1, "content": "hi" }]));

        let notification = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(notification["subscription_id"], sub);
        assert_eq!(notification["client"], json!(client));
        assert_eq!(notification["relay_url"], json!("wss://relay.damus.io"));
        assert_eq!(notification["event"]["content"], json!("hi"));
    }
}
