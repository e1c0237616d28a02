//! Bridge configuration.
//!
//! Defaults suit a Rust host on the current machine; every field can be
//! overridden from the environment.
//!
//! | Variable                      | Field            |
//! |-------------------------------|------------------|
//! | `NOSTR_BRIDGE_LIBRARY`        | `library`        |
//! | `NOSTR_BRIDGE_SEARCH_PATH`    | `search_paths`   |
//! | `NOSTR_BRIDGE_HOST`           | `host`           |
//! | `NOSTR_BRIDGE_ARCH`           | `arch`           |
//! | `NOSTR_BRIDGE_LOG`            | `log_level`      |
//! | `NOSTR_BRIDGE_CONTEXT`        | `context`        |
//! | `NOSTR_BRIDGE_WORKER_THREADS` | `worker_threads` |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::{HostContext, SerialQueue, TokioContext};
use crate::error::{Error, Result};
use crate::logging::LogLevel;
use crate::platform::{Arch, HostPlatform};

/// Where host continuations run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextKind {
    /// Tasks on the bridge's shared tokio runtime
    #[default]
    Tokio,
    /// One dedicated thread, in order
    Serial,
}

impl ContextKind {
    /// Create the context
    pub fn build(self, worker_threads: usize) -> Result<Arc<dyn HostContext>> {
        match self {
            ContextKind::Tokio => {
                crate::runtime::configure(worker_threads);
                Ok(Arc::new(TokioContext::shared()?))
            }
            ContextKind::Serial => Ok(SerialQueue::spawn("nostr-bridge-host")?),
        }
    }
}

impl FromStr for ContextKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokio" => Ok(ContextKind::Tokio),
            "serial" | "main" => Ok(ContextKind::Serial),
            other => Err(Error::InvalidPayload(format!("unknown context `{}`", other))),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Explicit artifact path; skips the search when set
    pub library: Option<PathBuf>,
    /// Extra directories (or package roots) searched first
    pub search_paths: Vec<PathBuf>,
    /// Host whose artifact conventions apply
    pub host: HostPlatform,
    /// Architecture the artifact must match
    pub arch: Arch,
    /// Log level for `init_logger`
    pub log_level: LogLevel,
    /// Context for host continuations
    pub context: ContextKind,
    /// Worker threads of the shared runtime
    pub worker_threads: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            library: None,
            search_paths: Vec::new(),
            host: HostPlatform::Rust,
            arch: Arch::current(),
            log_level: LogLevel::default(),
            context: ContextKind::default(),
            worker_threads: 2,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values keep their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("NOSTR_BRIDGE_LIBRARY").filter(|p| !p.is_empty()) {
            config.library = Some(PathBuf::from(path));
        }
        if let Some(paths) = lookup("NOSTR_BRIDGE_SEARCH_PATH") {
            config.search_paths = env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()).collect();
        }
        parse_into(&lookup, "NOSTR_BRIDGE_HOST", &mut config.host);
        parse_into(&lookup, "NOSTR_BRIDGE_ARCH", &mut config.arch);
        parse_into(&lookup, "NOSTR_BRIDGE_LOG", &mut config.log_level);
        parse_into(&lookup, "NOSTR_BRIDGE_CONTEXT", &mut config.context);

        if let Some(raw) = lookup("NOSTR_BRIDGE_WORKER_THREADS") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.worker_threads = n,
                _ => tracing::warn!("Ignoring NOSTR_BRIDGE_WORKER_THREADS={}", raw),
            }
        }

        config
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr<Err = Error>,
{
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(e) => tracing::warn!("Ignoring {}={}: {}", key, raw, e),
        }
    }
}
