//! # FFI Bindings
//!
//! The C ABI between a native core and the per-runtime adapters.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         FFI ARCHITECTURE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Kotlin (JVM/Android)   Kotlin/Native   Swift          Rust             │
//! │  JNA, dlopen            cinterop, .a    xcframework    libloading       │
//! │         │                    │              │              │            │
//! │         └────────────────────┴──────────────┴──────────────┘            │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  nostr_sdk_ffi_*                                                │   │
//! │  │                                                                 │   │
//! │  │  abi_version  contract_fingerprint  call  call_async  cancel    │   │
//! │  │  handle_free  buffer_free  set_event_callback                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                           nostr-sdk native core                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Every call result travels as an [`FfiResult`]: status, error kind, and a
//! buffer holding the JSON return value or the failure message. Buffers go
//! back to the core through `buffer_free`.

mod types;

pub mod exports;

pub use types::*;

/// Export an [`EmbeddedCore`](crate::native::EmbeddedCore) through the C ABI
///
/// `factory` is a path to `fn() -> Result<EmbeddedCore>`; it runs on first
/// use. The invocation also defines `abi_table()`, the same functions as an
/// [`AbiTable`] for statically linked hosts.
///
/// ```ignore
/// nostr_bridge::export_native_core!(my_core::build);
/// ```
///
/// `export_native_core!(unexported path)` omits `#[no_mangle]`, so several
/// cores can live in one binary and be reached only through `abi_table()`.
#[macro_export]
macro_rules! export_native_core {
    (@emit [$($attr:tt)*] $factory:path) => {
        static __NOSTR_SDK_CORE: $crate::__private::OnceCell<
            ::std::option::Option<$crate::native::EmbeddedCore>,
        > = $crate::__private::OnceCell::new();

        fn __nostr_sdk_core() -> ::std::option::Option<&'static $crate::native::EmbeddedCore> {
            __NOSTR_SDK_CORE
                .get_or_init(|| $crate::ffi::exports::instantiate($factory))
                .as_ref()
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_abi_version() -> *const ::std::os::raw::c_char {
            $crate::ffi::exports::abi_version(__nostr_sdk_core())
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_contract_fingerprint() -> *const ::std::os::raw::c_char {
            $crate::ffi::exports::contract_fingerprint(__nostr_sdk_core())
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_call(
            selector: u32,
            handle: u64,
            args: *const u8,
            len: usize,
        ) -> $crate::ffi::FfiResult {
            $crate::ffi::exports::call(__nostr_sdk_core(), selector, handle, args, len)
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_call_async(
            selector: u32,
            handle: u64,
            args: *const u8,
            len: usize,
            token: u64,
            callback: $crate::ffi::CompletionCallback,
            user_data: *mut ::std::ffi::c_void,
        ) -> i32 {
            $crate::ffi::exports::call_async(
                __nostr_sdk_core(),
                selector,
                handle,
                args,
                len,
                token,
                callback,
                user_data,
            )
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_cancel(token: u64) -> i32 {
            $crate::ffi::exports::cancel(__nostr_sdk_core(), token)
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_handle_free(handle: u64) -> i32 {
            $crate::ffi::exports::handle_free(__nostr_sdk_core(), handle)
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_buffer_free(buffer: $crate::ffi::FfiBuffer) {
            $crate::ffi::exports::buffer_free(buffer)
        }

        $($attr)*
        pub unsafe extern "C" fn nostr_sdk_ffi_set_event_callback(
            callback: ::std::option::Option<$crate::ffi::EventCallback>,
            user_data: *mut ::std::ffi::c_void,
        ) {
            $crate::ffi::exports::set_event_callback(__nostr_sdk_core(), callback, user_data)
        }

        /// The exported functions as a table
        pub fn abi_table() -> $crate::ffi::AbiTable {
            $crate::ffi::AbiTable {
                abi_version: nostr_sdk_ffi_abi_version,
                contract_fingerprint: nostr_sdk_ffi_contract_fingerprint,
                call: nostr_sdk_ffi_call,
                call_async: nostr_sdk_ffi_call_async,
                cancel: nostr_sdk_ffi_cancel,
                handle_free: nostr_sdk_ffi_handle_free,
                buffer_free: nostr_sdk_ffi_buffer_free,
                set_event_callback: nostr_sdk_ffi_set_event_callback,
            }
        }
    };
    (unexported $factory:path) => {
        $crate::export_native_core!(@emit [] $factory);
    };
    ($factory:path) => {
        $crate::export_native_core!(@emit [#[no_mangle]] $factory);
    };
}
