//! # Error Handling
//!
//! Error types for the binding layer.
//!
//! ## Error Taxonomy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR TAXONOMY                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Load Errors (fatal at startup)                                    │
//! │  │   ├── ArtifactNotFound      - Native library not on any search path │
//! │  │   ├── ArchitectureMismatch  - Artifact built for another CPU        │
//! │  │   ├── LibraryOpen           - dlopen/LoadLibrary failed             │
//! │  │   ├── MissingSymbol         - ABI symbol not exported               │
//! │  │   ├── VersionMismatch       - Core ABI version != contract version  │
//! │  │   └── ContractMismatch      - Signature fingerprint drifted         │
//! │  │                                                                      │
//! │  ├── Marshal Errors (version skew, programmer error)                   │
//! │  │   ├── UnknownFunction       - Not in the contract                   │
//! │  │   ├── ArgumentCount/Type    - Arguments don't match the signature   │
//! │  │   └── ReturnType            - Core returned an unexpected shape     │
//! │  │                                                                      │
//! │  ├── Lifecycle Errors (programmer error)                               │
//! │  │   ├── UseAfterFree          - Handle already released               │
//! │  │   ├── DoubleFree            - Explicit free on a freed handle       │
//! │  │   └── WrongHandleKind       - Handle passed where another expected  │
//! │  │                                                                      │
//! │  └── Native Errors (expected, recoverable)                             │
//! │      ├── Native { kind, msg }  - Reported by the core                  │
//! │      └── Cancelled             - Host cancelled an async call          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crossing the Boundary
//!
//! ```text
//!  Native Core               Adapter (Rust)                 Host
//!  ─────────────────────────────────────────────────────────────────────
//!  FfiResult{status=1,   →   Error::Native{kind, message} → throw / Err
//!   kind=3, "timeout"}        code 400, category Native     kind preserved
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for binding-layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Artifact missing or incompatible. Unrecoverable.
    Load,
    /// Argument/return mismatch across the boundary.
    Marshal,
    /// Handle or token misuse detected by the adapter's guards.
    Lifecycle,
    /// Failure reported by the native core.
    Native,
    /// Adapter bug.
    Internal,
}

/// Main error type for the binding layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Load Errors (100-199)
    // ========================================================================
    /// The native artifact was not found on any search path
    #[error("Native library `{name}` not found (searched: {searched})")]
    ArtifactNotFound {
        /// File name that was looked for
        name: String,
        /// Directories searched, joined for display
        searched: String,
    },

    /// The artifact exists but was built for another architecture
    #[error("Native library {path} is built for {found}, expected {expected}")]
    ArchitectureMismatch {
        /// Artifact path
        path: String,
        /// Architecture the host needs
        expected: String,
        /// Architecture read from the artifact header
        found: String,
    },

    /// The dynamic loader refused the artifact
    #[error("Failed to open native library: {0}")]
    LibraryOpen(String),

    /// An ABI symbol is missing from the artifact
    #[error("Native library does not export `{0}`")]
    MissingSymbol(String),

    /// The core reports an ABI version the contract wasn't generated against
    #[error("ABI version mismatch: bindings expect {expected}, native core is {found}")]
    VersionMismatch {
        /// Contract version
        expected: String,
        /// Version reported by the core
        found: String,
    },

    /// Same version, different signatures
    #[error("Contract fingerprint mismatch: bindings expect {expected}, native core has {found}")]
    ContractMismatch {
        /// Contract fingerprint
        expected: String,
        /// Fingerprint reported by the core
        found: String,
    },

    /// No artifact convention for this host/architecture pair
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    // ========================================================================
    // Marshal Errors (200-299)
    // ========================================================================
    /// Function is not part of the contract
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number of arguments
    #[error("`{function}` takes {expected} argument(s), got {found}")]
    ArgumentCount {
        /// Function name
        function: String,
        /// Declared arity
        expected: usize,
        /// Supplied arity
        found: usize,
    },

    /// Argument doesn't match the declared type
    #[error("`{function}` argument {index}: expected {expected}, got {found}")]
    ArgumentType {
        /// Function name
        function: String,
        /// Zero-based argument index
        index: usize,
        /// Declared type
        expected: String,
        /// Supplied JSON shape
        found: String,
    },

    /// Core returned a value that doesn't match the declared return type
    #[error("`{function}` returned {found}, expected {expected}")]
    ReturnType {
        /// Function name
        function: String,
        /// Declared type
        expected: String,
        /// Returned JSON shape
        found: String,
    },

    /// Payload bytes could not be decoded
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Sync entry point used for an async function or the reverse
    #[error("`{function}` is {actual}; use the matching call entry point")]
    CallStyle {
        /// Function name
        function: String,
        /// "async" or "sync"
        actual: &'static str,
    },

    // ========================================================================
    // Lifecycle Errors (300-399)
    // ========================================================================
    /// Handle used after it was freed
    #[error("Handle {0} used after free")]
    UseAfterFree(u64),

    /// Explicit free of an already freed handle
    #[error("Handle {0} already freed")]
    DoubleFree(u64),

    /// Handle of the wrong kind
    #[error("Handle {handle} is a {found}, expected {expected}")]
    WrongHandleKind {
        /// Handle id
        handle: u64,
        /// Declared kind
        expected: String,
        /// Actual kind
        found: String,
    },

    // ========================================================================
    // Native Errors (400-499)
    // ========================================================================
    /// Protocol-level failure reported by the core
    #[error("{message}")]
    Native {
        /// Native error kind code
        kind: i32,
        /// Native error message
        message: String,
    },

    /// Async call cancelled by the host
    #[error("Operation cancelled")]
    Cancelled,

    /// The core was shut down or refused the call
    #[error("Native core unavailable: {0}")]
    CoreUnavailable(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================
    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Get the error code for FFI
    ///
    /// - 100-199: Load
    /// - 200-299: Marshal
    /// - 300-399: Lifecycle
    /// - 400-499: Native
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Load (100-199)
            Error::ArtifactNotFound { .. } => 100,
            Error::ArchitectureMismatch { .. } => 101,
            Error::LibraryOpen(_) => 102,
            Error::MissingSymbol(_) => 103,
            Error::VersionMismatch { .. } => 104,
            Error::ContractMismatch { .. } => 105,
            Error::UnsupportedPlatform(_) => 106,

            // Marshal (200-299)
            Error::UnknownFunction(_) => 200,
            Error::ArgumentCount { .. } => 201,
            Error::ArgumentType { .. } => 202,
            Error::ReturnType { .. } => 203,
            Error::InvalidPayload(_) => 204,
            Error::CallStyle { .. } => 205,

            // Lifecycle (300-399)
            Error::UseAfterFree(_) => 300,
            Error::DoubleFree(_) => 301,
            Error::WrongHandleKind { .. } => 302,

            // Native (400-499)
            Error::Native { .. } => 400,
            Error::Cancelled => 401,
            Error::CoreUnavailable(_) => 402,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::Serialization(_) => 901,
        }
    }

    /// Name of the enum variant, as a Rust host sees it
    pub fn variant_name(&self) -> &'static str {
        match self {
            Error::ArtifactNotFound { .. } => "ArtifactNotFound",
            Error::ArchitectureMismatch { .. } => "ArchitectureMismatch",
            Error::LibraryOpen(_) => "LibraryOpen",
            Error::MissingSymbol(_) => "MissingSymbol",
            Error::VersionMismatch { .. } => "VersionMismatch",
            Error::ContractMismatch { .. } => "ContractMismatch",
            Error::UnsupportedPlatform(_) => "UnsupportedPlatform",
            Error::UnknownFunction(_) => "UnknownFunction",
            Error::ArgumentCount { .. } => "ArgumentCount",
            Error::ArgumentType { .. } => "ArgumentType",
            Error::ReturnType { .. } => "ReturnType",
            Error::InvalidPayload(_) => "InvalidPayload",
            Error::CallStyle { .. } => "CallStyle",
            Error::UseAfterFree(_) => "UseAfterFree",
            Error::DoubleFree(_) => "DoubleFree",
            Error::WrongHandleKind { .. } => "WrongHandleKind",
            Error::Native { .. } => "Native",
            Error::Cancelled => "Cancelled",
            Error::CoreUnavailable(_) => "CoreUnavailable",
            Error::Internal(_) => "Internal",
            Error::Serialization(_) => "Serialization",
        }
    }

    /// Taxonomy bucket for this error
    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            100..=199 => ErrorCategory::Load,
            200..=299 => ErrorCategory::Marshal,
            300..=399 => ErrorCategory::Lifecycle,
            400..=499 => ErrorCategory::Native,
            _ => ErrorCategory::Internal,
        }
    }

    /// Native failures are the only expected, recoverable category
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Native
    }

    /// Native error kind, if this error came from the core
    pub fn native_kind(&self) -> Option<i32> {
        match self {
            Error::Native { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Log marshal and lifecycle errors loudly; they point at version skew.
    pub(crate) fn surfaced(self) -> Self {
        match self.category() {
            ErrorCategory::Marshal | ErrorCategory::Lifecycle => {
                tracing::error!(code = self.code(), "{}", self);
            }
            _ => {}
        }
        self
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<libloading::Error> for Error {
    fn from(err: libloading::Error) -> Self {
        Error::LibraryOpen(err.to_string())
    }
}

// ============================================================================
// FFI ERROR REPRESENTATION
// ============================================================================

/// Host-neutral error representation
///
/// This is what every per-host failure rendering is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfiError {
    /// Numeric error code
    pub code: i32,
    /// Taxonomy bucket
    pub category: ErrorCategory,
    /// Native kind, when the core reported it
    pub kind: Option<i32>,
    /// Human-readable error message
    pub message: String,
    /// Whether the error is recoverable
    pub recoverable: bool,
}

impl From<&Error> for FfiError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            category: err.category(),
            kind: err.native_kind(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl From<Error> for FfiError {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::LibraryOpen("x".into()).code(), 102);
        assert_eq!(Error::UnknownFunction("f".into()).code(), 200);
        assert_eq!(Error::UseAfterFree(7).code(), 300);
        assert_eq!(Error::Cancelled.code(), 401);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_categories() {
        let mismatch = Error::VersionMismatch {
            expected: "0.43.0".into(),
            found: "0.42.1".into(),
        };
        assert_eq!(mismatch.category(), ErrorCategory::Load);
        assert_eq!(Error::DoubleFree(1).category(), ErrorCategory::Lifecycle);
        assert_eq!(
            Error::InvalidPayload("x".into()).category(),
            ErrorCategory::Marshal
        );
    }

    #[test]
    fn test_only_native_errors_are_recoverable() {
        let native = Error::Native {
            kind: 3,
            message: "relay not found".into(),
        };
        assert!(native.is_recoverable());
        assert!(Error::Cancelled.is_recoverable());
        assert!(!Error::UseAfterFree(1).is_recoverable());
        assert!(!Error::MissingSymbol("nostr_sdk_ffi_call".into()).is_recoverable());
    }

    #[test]
    fn test_ffi_error_keeps_native_kind_and_message() {
        let err = Error::Native {
            kind: 12,
            message: "event rejected: blocked".into(),
        };
        let ffi_err: FfiError = err.into();

        assert_eq!(ffi_err.code, 400);
        assert_eq!(ffi_err.kind, Some(12));
        assert_eq!(ffi_err.message, "event rejected: blocked");
        assert!(ffi_err.recoverable);
    }
}
