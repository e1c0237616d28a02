//! # Error Envelope
//!
//! Tagged result of one cross-boundary call: a JSON success payload or a
//! structured failure (kind + message). Produced once per call, decoded once
//! into a [`Result`], then dropped.

use crate::error::{Error, Result};
use crate::ffi::{FfiBuffer, FfiResult, CANCELLED_KIND};

/// Decoded error envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// JSON-encoded return value
    Success(Vec<u8>),
    /// Failure reported by the core
    Failure {
        /// Native error kind
        kind: i32,
        /// Native error message
        message: String,
    },
}

impl Envelope {
    /// Success carrying a JSON value
    pub fn success(value: &serde_json::Value) -> Self {
        Envelope::Success(value.to_string().into_bytes())
    }

    /// Failure with kind and message
    pub fn failure(kind: i32, message: impl Into<String>) -> Self {
        Envelope::Failure {
            kind,
            message: message.into(),
        }
    }

    /// Copy a C result out of core-owned memory, then release it
    ///
    /// `free` is called exactly once with the payload buffer.
    ///
    /// # Safety
    /// `result.payload` must be valid for `len` bytes until `free` runs.
    pub unsafe fn from_ffi(result: FfiResult, free: impl FnOnce(FfiBuffer)) -> Self {
        let bytes = result.payload.as_slice().to_vec();
        let status = result.status;
        let kind = result.error_kind;
        free(result.payload);

        if status == 0 {
            Envelope::Success(bytes)
        } else {
            Envelope::Failure {
                kind,
                message: String::from_utf8_lossy(&bytes).into_owned(),
            }
        }
    }

    /// Hand the envelope to C; the receiver releases it with `buffer_free`
    pub fn into_ffi(self) -> FfiResult {
        match self {
            Envelope::Success(bytes) => FfiResult::ok(bytes),
            Envelope::Failure { kind, message } => FfiResult::err(kind, message),
        }
    }

    /// Whether this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Envelope::Success(_))
    }

    /// Translate into the adapter's error model
    ///
    /// An empty success payload decodes as `null` (unit return).
    pub fn into_value(self) -> Result<serde_json::Value> {
        match self {
            Envelope::Success(bytes) if bytes.is_empty() => Ok(serde_json::Value::Null),
            Envelope::Success(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::InvalidPayload(format!("return value is not JSON: {}", e))),
            Envelope::Failure { kind, .. } if kind == CANCELLED_KIND => Err(Error::Cancelled),
            Envelope::Failure { kind, message } => Err(Error::Native { kind, message }),
        }
    }
}
