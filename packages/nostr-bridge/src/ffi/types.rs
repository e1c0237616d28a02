//! # FFI Types
//!
//! C-compatible types shared by the native core and every adapter.

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

/// Prefix of every exported ABI symbol
pub const SYMBOL_PREFIX: &str = "nostr_sdk_ffi_";

/// Status codes used by `call_async`, `cancel` and `handle_free`
pub mod status {
    /// Accepted / done
    pub const OK: i32 = 0;
    /// Unknown selector, token or handle
    pub const UNKNOWN: i32 = 1;
    /// The core refused the call (shutting down, malformed arguments)
    pub const REJECTED: i32 = 2;
}

/// Error kind a core reports for a call it cancelled
pub const CANCELLED_KIND: i32 = -1;

/// FFI-safe owned byte buffer
///
/// Buffers handed out by the core must go back through `buffer_free`
/// exactly once.
#[repr(C)]
#[derive(Debug)]
pub struct FfiBuffer {
    /// Pointer to the data
    pub ptr: *mut u8,
    /// Length of the data
    pub len: usize,
    /// Allocated capacity
    pub cap: usize,
}

impl FfiBuffer {
    /// Create from a Rust Vec<u8>
    pub fn from_vec(data: Vec<u8>) -> Self {
        let mut data = std::mem::ManuallyDrop::new(data);
        Self {
            ptr: data.as_mut_ptr(),
            len: data.len(),
            cap: data.capacity(),
        }
    }

    /// Create a null/empty buffer
    pub fn null() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }

    /// Whether the buffer points nowhere
    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Borrow the contents
    ///
    /// # Safety
    /// `ptr` must be valid for `len` bytes for the duration of the borrow.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() || self.len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.ptr, self.len)
        }
    }

    /// Take back a buffer built with [`FfiBuffer::from_vec`]
    ///
    /// # Safety
    /// The buffer must come from `from_vec` in this same allocator and must
    /// not be used afterwards.
    pub unsafe fn into_vec(self) -> Vec<u8> {
        if self.ptr.is_null() {
            Vec::new()
        } else {
            Vec::from_raw_parts(self.ptr, self.len, self.cap)
        }
    }
}

/// FFI-safe result type (the Error Envelope in C form)
#[repr(C)]
#[derive(Debug)]
pub struct FfiResult {
    /// 0 = success, 1 = failure
    pub status: i32,
    /// Error kind (0 on success)
    pub error_kind: i32,
    /// JSON payload on success, UTF-8 message on failure
    pub payload: FfiBuffer,
}

impl FfiResult {
    /// Successful result carrying a JSON payload
    pub fn ok(payload: Vec<u8>) -> Self {
        Self {
            status: 0,
            error_kind: 0,
            payload: FfiBuffer::from_vec(payload),
        }
    }

    /// Failure with a kind and message
    pub fn err(kind: i32, message: impl Into<String>) -> Self {
        Self {
            status: 1,
            error_kind: kind,
            payload: FfiBuffer::from_vec(message.into().into_bytes()),
        }
    }

    /// Whether the call succeeded
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Completion callback handed to `call_async`.
///
/// Invoked exactly once per accepted call, from a thread owned by the core,
/// also when the call was cancelled.
pub type CompletionCallback = extern "C" fn(token: u64, result: FfiResult, user_data: *mut c_void);

/// Event callback registered with `set_event_callback`.
///
/// `topic` and `payload` are borrowed for the duration of the call.
pub type EventCallback = extern "C" fn(
    topic: *const c_char,
    payload: *const u8,
    len: usize,
    user_data: *mut c_void,
);

/// Function table of the C ABI
///
/// Filled from `libloading` symbols for a shared library, or from the
/// functions generated by [`export_native_core!`](crate::export_native_core)
/// for a statically linked core.
#[derive(Clone, Copy)]
pub struct AbiTable {
    /// `nostr_sdk_ffi_abi_version`
    pub abi_version: unsafe extern "C" fn() -> *const c_char,
    /// `nostr_sdk_ffi_contract_fingerprint`
    pub contract_fingerprint: unsafe extern "C" fn() -> *const c_char,
    /// `nostr_sdk_ffi_call`
    pub call: unsafe extern "C" fn(selector: u32, handle: u64, args: *const u8, len: usize) -> FfiResult,
    /// `nostr_sdk_ffi_call_async`
    pub call_async: unsafe extern "C" fn(
        selector: u32,
        handle: u64,
        args: *const u8,
        len: usize,
        token: u64,
        callback: CompletionCallback,
        user_data: *mut c_void,
    ) -> i32,
    /// `nostr_sdk_ffi_cancel`
    pub cancel: unsafe extern "C" fn(token: u64) -> i32,
    /// `nostr_sdk_ffi_handle_free`
    pub handle_free: unsafe extern "C" fn(handle: u64) -> i32,
    /// `nostr_sdk_ffi_buffer_free`
    pub buffer_free: unsafe extern "C" fn(buffer: FfiBuffer),
    /// `nostr_sdk_ffi_set_event_callback`
    pub set_event_callback: unsafe extern "C" fn(callback: Option<EventCallback>, user_data: *mut c_void),
}

impl std::fmt::Debug for AbiTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbiTable").finish_non_exhaustive()
    }
}

/// Handle value meaning "no receiver"
pub const NO_HANDLE: u64 = 0;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Convert a C string to a Rust String
///
/// # Safety
/// The caller must ensure the pointer is valid and null-terminated.
pub unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_roundtrip() {
        let buffer = FfiBuffer::from_vec(b"[1,2]".to_vec());
        assert_eq!(buffer.len, 5);
        assert_eq!(unsafe { buffer.as_slice() }, b"[1,2]");
        assert_eq!(unsafe { buffer.into_vec() }, b"[1,2]".to_vec());
    }

    #[test]
    fn test_null_buffer() {
        let buffer = FfiBuffer::null();
        assert!(buffer.is_null());
        assert!(unsafe { buffer.as_slice() }.is_empty());
        assert!(unsafe { buffer.into_vec() }.is_empty());
    }

    #[test]
    fn test_result_constructors() {
        let ok = FfiResult::ok(b"true".to_vec());
        assert!(ok.is_ok());
        assert_eq!(ok.error_kind, 0);
        drop(unsafe { ok.payload.into_vec() });

        let err = FfiResult::err(3, "timeout");
        assert!(!err.is_ok());
        assert_eq!(err.error_kind, 3);
        assert_eq!(unsafe { err.payload.into_vec() }, b"timeout".to_vec());
    }

    #[test]
    fn test_cstr_to_string_null() {
        assert_eq!(unsafe { cstr_to_string(std::ptr::null()) }, None);
        let s = std::ffi::CString::new("0.43.0").unwrap();
        assert_eq!(unsafe { cstr_to_string(s.as_ptr()) }, Some("0.43.0".into()));
    }
}
