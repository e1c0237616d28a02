//! # Logging
//!
//! `tracing` subscriber setup for hosts that don't bring their own.
//!
//! `RUST_LOG` wins when set; otherwise the filter is
//! `info,nostr_bridge=<level>`. Installing twice is a no-op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Log verbosity for the bridge's own targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Default `EnvFilter` directive for this level
    pub fn directive(self) -> String {
        format!("info,nostr_bridge={}", self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(Error::InvalidPayload(format!("unknown log level `{}`", other))),
        }
    }
}

/// Install the fmt subscriber
///
/// Returns `false` if a global subscriber was already set (by us or by the
/// host), in which case nothing changes.
pub fn init_logger(level: LogLevel) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.directive().into()),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logger installed at {}", level);
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!(" warning ".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_directive() {
        assert_eq!(LogLevel::Trace.directive(), "info,nostr_bridge=trace");
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_init_is_idempotent() {
        let _first = init_logger(LogLevel::Debug);
        assert!(!init_logger(LogLevel::Debug));
    }
}
