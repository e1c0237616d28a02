//! How a mapped error looks on each host
//!
//! Rendered as `<Type>(<code>:<kind>): <message>`, where `<Type>` is what the
//! host's glue throws: an exception class on the JVM side, an error enum case
//! in Swift, the real [`Error`] variant path for Rust. Parsing the rendering
//! back yields the same code, kind and message, so a native failure survives
//! a trip through any host.

use std::fmt;

use serde::Serialize;

use super::HostPlatform;
use crate::contract::nostr_sdk;
use crate::error::{Error, ErrorCategory, FfiError, Result};

/// A binding-layer error as one host surfaces it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFailure {
    /// Host the failure is rendered for
    pub host: HostPlatform,
    /// Exception class or error case
    pub type_name: String,
    /// Binding-layer error code
    pub code: i32,
    /// Native error kind, for native failures
    pub kind: Option<i32>,
    /// Message
    pub message: String,
}

/// `relay_not_found` -> `RelayNotFound`
fn pascal(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `relay_not_found` -> `relayNotFound`
fn lower_camel(name: &str) -> String {
    let pascal = pascal(name);
    let mut chars = pascal.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => pascal,
    }
}

/// Variant name in snake case: the native kind's contract name, or the
/// taxonomy bucket for adapter-side errors
fn variant(error: &Error) -> String {
    match error {
        Error::Native { kind, .. } => nostr_sdk::contract()
            .error_kind(*kind)
            .map(|spec| spec.name.clone())
            .unwrap_or_else(|| "generic".into()),
        Error::Cancelled => "cancelled".into(),
        other => match other.category() {
            ErrorCategory::Load => "load".into(),
            ErrorCategory::Marshal => "marshal".into(),
            ErrorCategory::Lifecycle => "lifecycle".into(),
            ErrorCategory::Native => "native".into(),
            ErrorCategory::Internal => "internal".into(),
        },
    }
}

impl HostFailure {
    /// Render `error` for `host`
    pub fn render(host: HostPlatform, error: &Error) -> Self {
        let variant = variant(error);
        let type_name = match host {
            HostPlatform::Jvm | HostPlatform::Android => {
                format!("rust.nostr.sdk.NostrSdkException${}", pascal(&variant))
            }
            HostPlatform::KotlinNative => format!("NostrSdkException.{}", pascal(&variant)),
            HostPlatform::Swift => format!("NostrSdkError.{}", lower_camel(&variant)),
            HostPlatform::Rust => format!("nostr_bridge::Error::{}", error.variant_name()),
        };

        let message = match error {
            Error::Native { message, .. } => message.clone(),
            other => other.to_string(),
        };

        Self {
            host,
            type_name,
            code: error.code(),
            kind: error.native_kind(),
            message,
        }
    }

    /// Parse a rendering produced by [`HostFailure::render`]
    pub fn parse(host: HostPlatform, text: &str) -> Result<Self> {
        let invalid = || Error::InvalidPayload(format!("not a rendered failure: {}", text));

        let open = text.find('(').ok_or_else(invalid)?;
        let close = text[open..].find("): ").map(|i| open + i).ok_or_else(invalid)?;
        let (code, kind) = text[open + 1..close].split_once(':').ok_or_else(invalid)?;

        Ok(Self {
            host,
            type_name: text[..open].to_string(),
            code: code.parse().map_err(|_| invalid())?,
            kind: if kind.is_empty() {
                None
            } else {
                Some(kind.parse().map_err(|_| invalid())?)
            },
            message: text[close + 3..].to_string(),
        })
    }

    /// Back to the adapter's error model
    ///
    /// Native failures and cancellation come back exactly; other categories
    /// keep their message under an internal error.
    pub fn into_error(self) -> Error {
        match (self.code, self.kind) {
            (400, Some(kind)) => Error::Native {
                kind,
                message: self.message,
            },
            (401, _) => Error::Cancelled,
            _ => Error::Internal(self.message),
        }
    }

    /// Host-neutral form
    pub fn to_ffi_error(&self) -> FfiError {
        FfiError {
            code: self.code,
            category: category_of(self.code),
            kind: self.kind,
            message: self.message.clone(),
            recoverable: (400..500).contains(&self.code),
        }
    }
}

fn category_of(code: i32) -> ErrorCategory {
    match code {
        100..=199 => ErrorCategory::Load,
        200..=299 => ErrorCategory::Marshal,
        300..=399 => ErrorCategory::Lifecycle,
        400..=499 => ErrorCategory::Native,
        _ => ErrorCategory::Internal,
    }
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}:", self.type_name, self.code)?;
        if let Some(kind) = self.kind {
            write!(f, "{}", kind)?;
        }
        write!(f, "): {}", self.message)
    }
}
