//! End-to-end checks through the C ABI: an embedded loopback core exported
//! with `export_native_core!`, reached by the adapter through `DynamicCore`
//! exactly as a shared library would be.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};

use nostr_bridge::contract::nostr_sdk::{self, kinds};
use nostr_bridge::native::{loopback, DynamicCore, EmbeddedCore, NativeCore};
use nostr_bridge::{
    Adapter, Client, Error, HandleNotification, HostFailure, HostPlatform, SerialQueue, Signer,
    TokioContext,
};

const SECRET: &str = "6b911fd37cdf5c81d4c0adb1ab7fa822ed253ab0ad9aa18d77257c88b29b718e";
const RELAY: &str = "wss://relay.example.com";

mod current {
    nostr_bridge::export_native_core!(unexported nostr_bridge::native::loopback::core);
}

mod notifying {
    nostr_bridge::export_native_core!(unexported nostr_bridge::native::loopback::core);
}

mod outdated {
    fn build() -> nostr_bridge::Result<nostr_bridge::native::EmbeddedCore> {
        nostr_bridge::native::loopback::builder().version("0.42.0").build()
    }

    nostr_bridge::export_native_core!(unexported build);
}

mod broken {
    fn build() -> nostr_bridge::Result<nostr_bridge::native::EmbeddedCore> {
        Err(nostr_bridge::Error::Internal("no engine".into()))
    }

    nostr_bridge::export_native_core!(unexported build);
}

fn core(table: nostr_bridge::ffi::AbiTable) -> Arc<DynamicCore> {
    Arc::new(DynamicCore::from_table(table, "test table"))
}

fn adapter_over(core: Arc<DynamicCore>) -> Adapter {
    Adapter::load(
        core,
        nostr_sdk::contract(),
        Arc::new(TokioContext::shared().unwrap()),
    )
    .unwrap()
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ============================================================================
// LOADING
// ============================================================================

#[test]
fn test_outdated_core_is_refused() {
    let err = Adapter::load(
        core(outdated::abi_table()),
        nostr_sdk::contract(),
        Arc::new(TokioContext::shared().unwrap()),
    )
    .unwrap_err();

    assert_eq!(
        err,
        Error::VersionMismatch {
            expected: nostr_sdk::ABI_VERSION.into(),
            found: "0.42.0".into(),
        }
    );
    assert_eq!(err.category(), nostr_bridge::ErrorCategory::Load);
}

#[test]
fn test_failed_factory_reports_no_version() {
    let err = Adapter::load(
        core(broken::abi_table()),
        nostr_sdk::contract(),
        Arc::new(TokioContext::shared().unwrap()),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidPayload(_)), "{:?}", err);
}

// ============================================================================
// CALLS
// ============================================================================

#[tokio::test]
async fn test_client_flow_over_abi() {
    let adapter = adapter_over(core(current::abi_table()));
    let signer = Signer::from_secret_key(&adapter, SECRET).unwrap();
    let client = Client::new(&adapter, Some(&signer)).unwrap();

    assert!(client.add_relay(RELAY).await.unwrap());
    client.connect().await.unwrap();
    client.wait_for_connection(Duration::from_secs(1)).await.unwrap();

    let output = client
        .send_event(json!({ "kind": 30_001, "content": "over the abi" }))
        .await
        .unwrap();
    let events = client
        .fetch_events(json!({ "ids": [output.id] }), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["pubkey"], json!(signer.public_key().await.unwrap()));
}

#[tokio::test]
async fn test_native_errors_round_trip_every_host() {
    let adapter = adapter_over(core(current::abi_table()));
    let client = Client::new(&adapter, None).unwrap();

    let err = client.remove_relay("wss://missing.example").await.unwrap_err();
    assert_eq!(err.native_kind(), Some(kinds::RELAY_NOT_FOUND));

    for host in HostPlatform::ALL {
        let rendered = HostFailure::render(host, &err).to_string();
        let back = HostFailure::parse(host, &rendered).unwrap().into_error();
        assert_eq!(back, err, "{}", rendered);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_async_call_resolves_once() {
    let adapter = adapter_over(core(current::abi_table()));
    let client = Client::new(&adapter, None).unwrap();

    let calls: Vec<_> = (0..20)
        .map(|_| {
            adapter
                .call_async(
                    "client_wait_for_connection",
                    Some(client.handle()),
                    vec![200u64.into()],
                )
                .unwrap()
        })
        .collect();

    let mut outcomes = Vec::new();
    for (i, call) in calls.into_iter().enumerate() {
        if i % 2 == 0 {
            assert!(call.cancel());
            assert!(!call.cancel());
        }
        outcomes.push(call.await);
    }

    let cancelled = outcomes
        .iter()
        .filter(|r| matches!(r, Err(Error::Cancelled)))
        .count();
    let timed_out = outcomes
        .iter()
        .filter(|r| matches!(r, Err(e) if e.native_kind() == Some(kinds::TIMEOUT)))
        .count();
    assert_eq!(cancelled, 10);
    assert_eq!(timed_out, 10);

    // The core still completes the cancelled calls; those are discarded.
    wait_until("late completions", || adapter.stats().late_completions == 10);
    let stats = adapter.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.resolved, 10);
    assert_eq!(stats.cancelled, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adapters_sharing_a_core_keep_their_calls_apart() {
    // Both registries start counting at the same point in a fresh process;
    // the core must still see distinct in-flight calls.
    let first = adapter_over(core(current::abi_table()));
    let second = adapter_over(core(current::abi_table()));
    let a = Client::new(&first, None).unwrap();
    let b = Client::new(&second, None).unwrap();

    let slow_a = first
        .call_async("client_wait_for_connection", Some(a.handle()), vec![300u64.into()])
        .unwrap();
    let slow_b = second
        .call_async("client_wait_for_connection", Some(b.handle()), vec![300u64.into()])
        .unwrap();
    assert_ne!(slow_a.token(), slow_b.token());

    let (ra, rb) = tokio::join!(slow_a, slow_b);
    assert_eq!(ra.unwrap_err().native_kind(), Some(kinds::TIMEOUT));
    assert_eq!(rb.unwrap_err().native_kind(), Some(kinds::TIMEOUT));
    assert_eq!(first.stats().cancelled, 0);
    assert_eq!(second.stats().cancelled, 0);
}

#[test]
fn test_concurrent_dispose_frees_once() {
    let core = core(current::abi_table());
    let adapter = adapter_over(core.clone());
    let client = Client::new(&adapter, None).unwrap();
    let id = client.handle().id();

    let ok = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let ok = ok.clone();
            std::thread::spawn(move || {
                if client.handle().dispose().is_ok() {
                    ok.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    drop(client);

    assert_eq!(ok.load(Ordering::SeqCst), 1);
    assert_eq!(adapter.stats().frees, 1);
    // The core no longer knows the handle.
    assert_eq!(core.free_handle(id), Err(Error::DoubleFree(id)));
}

#[test]
fn test_callbacks_run_on_serial_queue() {
    let queue = SerialQueue::spawn("host-main").unwrap();
    let adapter = Adapter::load(
        core(current::abi_table()),
        nostr_sdk::contract(),
        queue.clone(),
    )
    .unwrap();
    let signer = Signer::from_secret_key(&adapter, SECRET).unwrap();

    let (tx, rx) = mpsc::channel();
    for _ in 0..5 {
        let tx = tx.clone();
        let queue = queue.clone();
        adapter
            .call_with_callback("signer_public_key", Some(signer.handle()), vec![], move |result| {
                let _ = tx.send((result, queue.is_current()));
            })
            .unwrap();
    }

    for _ in 0..5 {
        let (result, on_queue) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(on_queue);
        assert_eq!(result.unwrap().as_str().map(str::len), Some(64));
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Value>>,
    shutdowns: AtomicUsize,
}

impl HandleNotification for Recorder {
    fn handle_msg(&self, _relay_url: &str, _message: &Value) {}

    fn handle(&self, _relay_url: &str, _subscription_id: &str, event: &Value) {
        self.events.lock().push(event.clone());
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notifications_cross_the_abi() {
    let adapter = adapter_over(core(notifying::abi_table()));
    let recorder = Arc::new(Recorder::default());
    adapter.set_notification_handler(recorder.clone());

    let signer = Signer::from_secret_key(&adapter, SECRET).unwrap();
    let client = Client::new(&adapter, Some(&signer)).unwrap();
    client.add_relay(RELAY).await.unwrap();
    client.subscribe(json!({ "kinds": [30_002] })).await.unwrap();
    client
        .send_event(json!({ "kind": 30_002, "content": "pushed" }))
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let recorder_done = recorder.clone();
    tokio::task::spawn_blocking(move || {
        wait_until("notifications", || {
            recorder_done.shutdowns.load(Ordering::SeqCst) == 1 && recorder_done.events.lock().len() == 1
        })
    })
    .await
    .unwrap();

    let events = recorder.events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["content"], json!("pushed"));
    assert!(adapter.stats().notifications >= 2);
}

#[test]
fn test_embedded_core_matches_exported_contract() {
    let embedded: EmbeddedCore = loopback::core().unwrap();
    let exported = core(current::abi_table());
    assert_eq!(embedded.abi_version().unwrap(), exported.abi_version().unwrap());
    assert_eq!(
        embedded.contract_fingerprint().unwrap(),
        exported.contract_fingerprint().unwrap()
    );
}
