//! # Host-Facing API
//!
//! Typed wrappers over the adapter: the `Client`, `Signer` and
//! `EventStream` a Rust host programs against, mirroring the generated
//! Kotlin and Swift classes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SURFACE → ADAPTER                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Signer::from_secret_key ──► signer_from_secret_key   (sync)            │
//! │  Client::new             ──► client_new               (sync)            │
//! │  client.connect().await  ──► client_connect           (async)           │
//! │  client.stream_events()  ──► client_stream_events ──► EventStream       │
//! │  stream.next().await     ──► event_stream_next        (serialized)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wrappers hold a [`NativeHandle`](crate::handle::NativeHandle) and the
//! [`Adapter`]; all protocol state lives in the core. Dropping a wrapper
//! releases its native object once the last clone of the handle goes away.

mod client;
mod signer;
mod stream;

pub use client::{Client, SendEventOutput};
pub use signer::Signer;
pub use stream::EventStream;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::adapter::Adapter;
use crate::error::{Error, Result};
use crate::logging::LogLevel;

/// Ask the core to install its logger
pub fn init_logger(adapter: &Adapter, level: LogLevel) -> Result<()> {
    adapter.call("init_logger", None, vec![level.as_str().into()])?;
    Ok(())
}

/// Git revision the core was built from, if it knows
pub fn git_hash_version(adapter: &Adapter) -> Result<Option<String>> {
    let value = adapter.call("git_hash_version", None, vec![])?;
    typed("git_hash_version", value)
}

/// Decode a type-checked return value into its Rust shape
pub(crate) fn typed<T: DeserializeOwned>(function: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Serialization(format!("`{}`: {}", function, e)))
}

/// Timeouts cross the boundary as whole milliseconds
pub(crate) fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::context::TokioContext;
    use crate::contract::nostr_sdk;
    use crate::native::loopback;

    pub(crate) const SECRET: &str = "6b911fd37cdf5c81d4c0adb1ab7fa822ed253ab0ad9aa18d77257c88b29b718e";

    pub(crate) fn adapter() -> Adapter {
        Adapter::load(
            Arc::new(loopback::core().unwrap()),
            nostr_sdk::contract(),
            Arc::new(TokioContext::shared().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_free_functions() {
        let adapter = adapter();
        assert!(init_logger(&adapter, LogLevel::Warn).is_ok());
        assert_eq!(git_hash_version(&adapter).unwrap(), crate::git_hash_version().map(String::from));
    }
}
