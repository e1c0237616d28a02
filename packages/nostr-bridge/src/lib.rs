//! # nostr-bridge
//!
//! Cross-platform FFI binding layer for the nostr-sdk native core.
//!
//! The protocol engine lives in a native library behind a small C ABI. This
//! crate is the glue every host runtime needs around it: loading and
//! validating the artifact, marshaling calls, mapping errors, resolving
//! async completions exactly once, and guarding the lifetime of the opaque
//! handles the core hands out. It is itself the Rust host, and carries the
//! artifact conventions of the JVM, Android, Kotlin/Native and Swift hosts.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         NOSTR-BRIDGE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  surface        Client · Signer · EventStream                   │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │                                       │
//! │  ┌──────────────────────────────▼──────────────────────────────────┐   │
//! │  │  adapter        load · call · call_async · cancel · adopt       │   │
//! │  │                                                                 │   │
//! │  │  marshal ─ descriptor ─ envelope      callback (pending tokens) │   │
//! │  │  handle (leases, frees)               context (host executor)   │   │
//! │  └──────────────┬───────────────────────────────────┬──────────────┘   │
//! │                 │                                   │                   │
//! │  ┌──────────────▼──────────────┐     ┌──────────────▼──────────────┐   │
//! │  │  contract                   │     │  native                     │   │
//! │  │  manifest · fingerprint     │     │  DynamicCore (libloading)   │   │
//! │  │  nostr_sdk surface          │     │  EmbeddedCore · loopback    │   │
//! │  └─────────────────────────────┘     └──────────────┬──────────────┘   │
//! │                                                     │                   │
//! │  platform (artifact layout, arch sniffing,    ┌─────▼─────┐            │
//! │  per-host failures)                           │ ffi (C ABI)│            │
//! │                                               └───────────┘            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types and the load/marshal/lifecycle/native taxonomy
//! - [`contract`] - Binding generator contract and its fingerprint
//! - [`ffi`] - C ABI types and `export_native_core!`
//! - [`native`] - Native cores: shared library, embedded, loopback (feature `loopback`)
//! - [`adapter`] - Per-runtime adapter
//! - [`surface`] - Host-facing `Client`, `Signer`, `EventStream`
//! - [`platform`] - Host artifact conventions and failure rendering
//! - [`config`] - Environment-driven configuration
//! - [`logging`] - `tracing` subscriber setup
//!
//! ## Example
//!
//! ```ignore
//! use nostr_bridge::{Adapter, BridgeConfig, Client, Signer};
//!
//! let adapter = Adapter::load_dynamic(&BridgeConfig::from_env())?;
//! let signer = Signer::from_secret_key(&adapter, secret)?;
//! let client = Client::new(&adapter, Some(&signer))?;
//! client.add_relay("wss://relay.damus.io").await?;
//! client.connect().await?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod adapter;
pub mod callback;
pub mod config;
pub mod context;
pub mod contract;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod events;
pub mod ffi;
pub mod handle;
pub mod logging;
pub mod marshal;
pub mod native;
pub mod platform;
pub mod surface;

mod runtime;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use adapter::{Adapter, AdapterStats, ListenerId, PendingCall};
pub use callback::CallbackToken;
pub use config::{BridgeConfig, ContextKind};
pub use context::{HostContext, SerialQueue, TokioContext};
pub use contract::{ContractManifest, HandleKind, ThreadSafety, TypeTag};
pub use error::{Error, ErrorCategory, FfiError, Result};
pub use events::{Addressed, HandleNotification, Notification};
pub use handle::NativeHandle;
pub use logging::{init_logger, LogLevel};
pub use marshal::CallArg;
pub use platform::{Arch, HostFailure, HostPlatform};
pub use surface::{Client, EventStream, SendEventOutput, Signer};

#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::OnceCell;
}

#[cfg(feature = "loopback-export")]
crate::export_native_core!(crate::native::loopback::core);

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of nostr-bridge
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Git revision baked in at build time through `NOSTR_BRIDGE_GIT_HASH`
pub fn git_hash_version() -> Option<&'static str> {
    option_env!("NOSTR_BRIDGE_GIT_HASH").filter(|hash| !hash.is_empty())
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        abi_version: contract::nostr_sdk::ABI_VERSION,
        fingerprint: contract::nostr_sdk::contract().fingerprint(),
        git_hash: git_hash_version(),
        arch: Arch::current(),
        os: platform::Os::current(),
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// ABI version of the bundled contract
    pub abi_version: &'static str,
    /// Fingerprint of the bundled contract
    pub fingerprint: String,
    /// Git revision, when known
    pub git_hash: Option<&'static str>,
    /// Architecture this binary targets
    pub arch: Arch,
    /// Operating system this binary targets
    pub os: platform::Os,
    /// Build profile
    pub profile: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_loopback_is_opt_in() {
        let manifest = include_str!("../Cargo.toml");
        let features = manifest.split("[features]").nth(1).unwrap();
        let default = features
            .lines()
            .find(|line| line.trim_start().starts_with("default"))
            .unwrap();
        assert!(!default.contains("loopback"));
        assert!(features.contains(r#"loopback-export = ["loopback"]"#));
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
        assert_eq!(info.abi_version, "0.43.0");
        assert_eq!(info.fingerprint.len(), 64);
        assert!(info.profile == "debug" || info.profile == "release");
    }
}
