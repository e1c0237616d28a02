//! The nostr-sdk contract.
//!
//! Selectors are grouped by receiver: 1-19 client, 20-29 signer,
//! 30-39 event stream, 40-49 free functions.

use once_cell::sync::Lazy;

use super::{ContractManifest, ErrorKindSpec, ExportedFunction, HandleKind, TypeTag};

/// Namespace shared with the generated Kotlin and Swift packages
pub const NAMESPACE: &str = "nostr_sdk";

/// ABI version of the native core these bindings are generated against
pub const ABI_VERSION: &str = "0.43.0";

/// Error kinds reported by the core
pub mod kinds {
    /// Anything without a more specific kind
    pub const GENERIC: i32 = 1;
    /// Relay URL is not in the pool
    pub const RELAY_NOT_FOUND: i32 = 2;
    /// Operation timed out
    pub const TIMEOUT: i32 = 3;
    /// Event JSON malformed or rejected
    pub const INVALID_EVENT: i32 = 4;
    /// Filter JSON malformed
    pub const INVALID_FILTER: i32 = 5;
    /// Signer missing or failed
    pub const SIGNER: i32 = 6;
    /// Relay URL malformed
    pub const INVALID_URL: i32 = 7;
    /// Client has been shut down
    pub const SHUTDOWN: i32 = 8;
}

static CONTRACT: Lazy<ContractManifest> = Lazy::new(build);

/// The contract compiled into these bindings
pub fn contract() -> &'static ContractManifest {
    &CONTRACT
}

fn build() -> ContractManifest {
    use HandleKind::*;

    let url = TypeTag::String;
    let timeout = TypeTag::U64;

    let functions = vec![
        // ── Client ──────────────────────────────────────────────────
        ExportedFunction::sync(1, "client_new")
            .arg("signer", TypeTag::optional(TypeTag::Handle(Signer)))
            .returns(TypeTag::Handle(Client)),
        ExportedFunction::asynchronous(2, "client_add_relay")
            .on(Client)
            .arg("url", url.clone())
            .returns(TypeTag::Bool),
        ExportedFunction::asynchronous(3, "client_remove_relay")
            .on(Client)
            .arg("url", url),
        ExportedFunction::asynchronous(4, "client_relays")
            .on(Client)
            .returns(TypeTag::list(TypeTag::String)),
        ExportedFunction::asynchronous(5, "client_connect").on(Client),
        ExportedFunction::asynchronous(6, "client_disconnect").on(Client),
        ExportedFunction::asynchronous(7, "client_wait_for_connection")
            .on(Client)
            .arg("timeout_ms", timeout.clone()),
        ExportedFunction::asynchronous(8, "client_send_event")
            .on(Client)
            .arg("event", TypeTag::Json)
            .returns(TypeTag::Json),
        ExportedFunction::asynchronous(9, "client_fetch_events")
            .on(Client)
            .arg("filter", TypeTag::Json)
            .arg("timeout_ms", timeout.clone())
            .returns(TypeTag::list(TypeTag::Json)),
        ExportedFunction::asynchronous(10, "client_stream_events")
            .on(Client)
            .arg("filter", TypeTag::Json)
            .arg("timeout_ms", timeout)
            .returns(TypeTag::Handle(EventStream)),
        ExportedFunction::asynchronous(11, "client_subscribe")
            .on(Client)
            .arg("filter", TypeTag::Json)
            .returns(TypeTag::String),
        ExportedFunction::asynchronous(12, "client_unsubscribe")
            .on(Client)
            .arg("subscription_id", TypeTag::String),
        ExportedFunction::asynchronous(13, "client_shutdown").on(Client),
        ExportedFunction::sync(14, "client_automatic_authentication")
            .on(Client)
            .arg("enable", TypeTag::Bool),
        // ── Signer ──────────────────────────────────────────────────
        ExportedFunction::sync(20, "signer_from_secret_key")
            .arg("secret_key", TypeTag::String)
            .returns(TypeTag::Handle(Signer)),
        ExportedFunction::asynchronous(21, "signer_public_key")
            .on(Signer)
            .returns(TypeTag::String),
        // ── Event stream ────────────────────────────────────────────
        ExportedFunction::asynchronous(30, "event_stream_next")
            .on(EventStream)
            .returns(TypeTag::optional(TypeTag::Json)),
        // ── Free functions ──────────────────────────────────────────
        ExportedFunction::sync(40, "init_logger").arg("level", TypeTag::String),
        ExportedFunction::sync(41, "git_hash_version").returns(TypeTag::optional(TypeTag::String)),
    ];

    let errors = [
        (kinds::GENERIC, "generic", false),
        (kinds::RELAY_NOT_FOUND, "relay_not_found", false),
        (kinds::TIMEOUT, "timeout", true),
        (kinds::INVALID_EVENT, "invalid_event", false),
        (kinds::INVALID_FILTER, "invalid_filter", false),
        (kinds::SIGNER, "signer", false),
        (kinds::INVALID_URL, "invalid_url", false),
        (kinds::SHUTDOWN, "shutdown", false),
    ]
    .into_iter()
    .map(|(code, name, recoverable)| ErrorKindSpec {
        code,
        name: name.to_string(),
        recoverable,
    })
    .collect();

    ContractManifest::new(NAMESPACE, ABI_VERSION, functions, errors)
        .expect("nostr-sdk contract has unique selectors and error codes")
}
