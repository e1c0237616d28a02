//! # Binding Contract
//!
//! The single source of truth for what crosses the FFI boundary: every
//! exported function, its argument and return types, the handle kinds it
//! operates on, and the error kinds the core may report.
//!
//! ## Lockstep
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        CONTRACT LOCKSTEP                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   ContractManifest ──► to_json() ──► glue generators (Kotlin, Swift)    │
//! │         │                                                               │
//! │         ├──► abi_version ─────────┐                                     │
//! │         └──► fingerprint() ───────┤                                     │
//! │                                   ▼                                     │
//! │                      check_compatible(core_version, core_fingerprint)   │
//! │                                   │                                     │
//! │                    equal ─────────┴───────── differs                    │
//! │                      │                          │                       │
//! │                   load ok              LoadError (no partial load)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any change to a selector, name, argument, return type, async flag,
//! receiver kind or error kind changes the fingerprint.

pub mod nostr_sdk;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// ============================================================================
// HANDLE KINDS
// ============================================================================

/// How concurrent calls on one handle are made safe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSafety {
    /// The core locks internally; the adapter lets calls through concurrently.
    Internal,
    /// The adapter serializes every call on the handle, including the whole
    /// lifetime of an async call.
    Serialized,
}

/// Kinds of native object the core hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    /// Client with its relay pool
    Client,
    /// Signer backed by a secret key held in the core
    Signer,
    /// Pull-based event stream
    EventStream,
}

impl HandleKind {
    /// Concurrency policy for this kind
    ///
    /// Client and signer are shared-state objects the core guards itself.
    /// The event stream wraps a single stream cursor and must be polled by
    /// one caller at a time.
    pub fn thread_safety(self) -> ThreadSafety {
        match self {
            HandleKind::Client | HandleKind::Signer => ThreadSafety::Internal,
            HandleKind::EventStream => ThreadSafety::Serialized,
        }
    }

    /// Snake-case name used in manifests and messages
    pub fn as_str(self) -> &'static str {
        match self {
            HandleKind::Client => "client",
            HandleKind::Signer => "signer",
            HandleKind::EventStream => "event_stream",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Type of an argument or return value, as carried in a JSON payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum TypeTag {
    /// JSON boolean
    Bool,
    /// Non-negative integer
    U64,
    /// Signed integer
    I64,
    /// Any JSON number
    F64,
    /// JSON string
    String,
    /// Array of integers in 0..=255
    Bytes,
    /// Any JSON value, opaque to the adapter
    Json,
    /// Native handle id of the given kind
    Handle(HandleKind),
    /// `null` or the inner type
    Optional(Box<TypeTag>),
    /// Array of the inner type
    List(Box<TypeTag>),
    /// `null`
    Unit,
}

impl TypeTag {
    /// Whether `value` has this type's JSON shape
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;

        match self {
            TypeTag::Bool => value.is_boolean(),
            TypeTag::U64 => value.is_u64(),
            TypeTag::I64 => value.is_i64(),
            TypeTag::F64 => value.is_number(),
            TypeTag::String => value.is_string(),
            TypeTag::Bytes => match value {
                Value::Array(items) => items
                    .iter()
                    .all(|b| b.as_u64().map(|b| b <= 255).unwrap_or(false)),
                _ => false,
            },
            TypeTag::Json => true,
            TypeTag::Handle(_) => value.is_u64(),
            TypeTag::Optional(inner) => value.is_null() || inner.matches(value),
            TypeTag::List(inner) => match value {
                Value::Array(items) => items.iter().all(|v| inner.matches(v)),
                _ => false,
            },
            TypeTag::Unit => value.is_null(),
        }
    }

    /// Handle kinds referenced anywhere inside this type
    pub fn handle_kind(&self) -> Option<HandleKind> {
        match self {
            TypeTag::Handle(kind) => Some(*kind),
            TypeTag::Optional(inner) | TypeTag::List(inner) => inner.handle_kind(),
            _ => None,
        }
    }

    /// Shorthand for `Optional`
    pub fn optional(inner: TypeTag) -> Self {
        TypeTag::Optional(Box::new(inner))
    }

    /// Shorthand for `List`
    pub fn list(inner: TypeTag) -> Self {
        TypeTag::List(Box::new(inner))
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Bool => f.write_str("bool"),
            TypeTag::U64 => f.write_str("u64"),
            TypeTag::I64 => f.write_str("i64"),
            TypeTag::F64 => f.write_str("f64"),
            TypeTag::String => f.write_str("string"),
            TypeTag::Bytes => f.write_str("bytes"),
            TypeTag::Json => f.write_str("json"),
            TypeTag::Handle(kind) => write!(f, "handle<{}>", kind),
            TypeTag::Optional(inner) => write!(f, "optional<{}>", inner),
            TypeTag::List(inner) => write!(f, "list<{}>", inner),
            TypeTag::Unit => f.write_str("unit"),
        }
    }
}

/// Short description of a JSON value's shape, for marshal errors
pub(crate) fn json_shape(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;

    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_u64() => "u64",
        Value::Number(n) if n.is_i64() => "i64",
        Value::Number(_) => "f64",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// FUNCTIONS & ERRORS
// ============================================================================

/// A named argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg {
    /// Argument name (used by generated host signatures)
    pub name: String,
    /// Argument type
    pub ty: TypeTag,
}

/// One exported operation of the native core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFunction {
    /// Numeric selector passed through the C ABI
    pub selector: u32,
    /// Stable name, also the host method name
    pub name: String,
    /// Handle kind the call is made on, if it's a method
    pub receiver: Option<HandleKind>,
    /// Positional arguments
    pub args: Vec<Arg>,
    /// Return type
    pub returns: TypeTag,
    /// Completed through a callback instead of returning directly
    pub is_async: bool,
}

impl ExportedFunction {
    /// Start a sync function definition
    pub fn sync(selector: u32, name: &str) -> Self {
        Self {
            selector,
            name: name.to_string(),
            receiver: None,
            args: Vec::new(),
            returns: TypeTag::Unit,
            is_async: false,
        }
    }

    /// Start an async function definition
    pub fn asynchronous(selector: u32, name: &str) -> Self {
        Self {
            is_async: true,
            ..Self::sync(selector, name)
        }
    }

    /// Make this a method on `kind`
    pub fn on(mut self, kind: HandleKind) -> Self {
        self.receiver = Some(kind);
        self
    }

    /// Append an argument
    pub fn arg(mut self, name: &str, ty: TypeTag) -> Self {
        self.args.push(Arg {
            name: name.to_string(),
            ty,
        });
        self
    }

    /// Set the return type
    pub fn returns(mut self, ty: TypeTag) -> Self {
        self.returns = ty;
        self
    }

    fn canonical(&self) -> String {
        let args = self
            .args
            .iter()
            .map(|a| format!("{}:{}", a.name, a.ty))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "fn {} {} recv={} args=({}) ret={} async={}",
            self.selector,
            self.name,
            self.receiver.map(HandleKind::as_str).unwrap_or("-"),
            args,
            self.returns,
            self.is_async,
        )
    }
}

/// An error kind the core may report in an error envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorKindSpec {
    /// Kind code carried in `FfiResult::error_kind`
    pub code: i32,
    /// Stable name; host exception subclasses and Swift cases use it
    pub name: String,
    /// Whether retrying may succeed
    pub recoverable: bool,
}

// ============================================================================
// MANIFEST
// ============================================================================

/// The complete binding contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractManifest {
    /// Library namespace (`nostr_sdk`)
    pub namespace: String,
    /// ABI version the contract was generated against
    pub abi_version: String,
    /// Exported functions
    pub functions: Vec<ExportedFunction>,
    /// Error kinds
    pub errors: Vec<ErrorKindSpec>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl ContractManifest {
    /// Build a manifest, rejecting duplicate selectors, names or error codes
    pub fn new(
        namespace: &str,
        abi_version: &str,
        functions: Vec<ExportedFunction>,
        errors: Vec<ErrorKindSpec>,
    ) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(functions.len());
        let mut selectors = HashMap::with_capacity(functions.len());

        for (idx, function) in functions.iter().enumerate() {
            if by_name.insert(function.name.clone(), idx).is_some() {
                return Err(Error::Internal(format!(
                    "duplicate function name `{}` in contract",
                    function.name
                )));
            }
            if let Some(other) = selectors.insert(function.selector, &function.name) {
                return Err(Error::Internal(format!(
                    "selector {} used by both `{}` and `{}`",
                    function.selector, other, function.name
                )));
            }
        }

        let mut codes = std::collections::HashSet::new();
        for kind in &errors {
            if !codes.insert(kind.code) {
                return Err(Error::Internal(format!(
                    "duplicate error kind code {} in contract",
                    kind.code
                )));
            }
        }

        Ok(Self {
            namespace: namespace.to_string(),
            abi_version: abi_version.to_string(),
            functions,
            errors,
            by_name,
        })
    }

    /// Look up a function by name
    pub fn function(&self, name: &str) -> Option<&ExportedFunction> {
        self.by_name.get(name).map(|&idx| &self.functions[idx])
    }

    /// Look up a function by selector
    pub fn by_selector(&self, selector: u32) -> Option<&ExportedFunction> {
        self.functions.iter().find(|f| f.selector == selector)
    }

    /// Look up an error kind by code
    pub fn error_kind(&self, code: i32) -> Option<&ErrorKindSpec> {
        self.errors.iter().find(|e| e.code == code)
    }

    /// SHA-256 over the canonical rendering of every signature and error kind
    pub fn fingerprint(&self) -> String {
        let mut functions: Vec<&ExportedFunction> = self.functions.iter().collect();
        functions.sort_by_key(|f| f.selector);
        let mut errors: Vec<&ErrorKindSpec> = self.errors.iter().collect();
        errors.sort_by_key(|e| e.code);

        let mut hasher = Sha256::new();
        hasher.update(format!("ns {}\n", self.namespace));
        for function in functions {
            hasher.update(function.canonical());
            hasher.update(b"\n");
        }
        for kind in errors {
            hasher.update(format!("err {} {} {}\n", kind.code, kind.name, kind.recoverable));
        }
        hex::encode(hasher.finalize())
    }

    /// Verify what a loaded core reports against this contract
    pub fn check_compatible(&self, core_version: &str, core_fingerprint: &str) -> Result<()> {
        if core_version != self.abi_version {
            return Err(Error::VersionMismatch {
                expected: self.abi_version.clone(),
                found: core_version.to_string(),
            });
        }

        let expected = self.fingerprint();
        if !core_fingerprint.eq_ignore_ascii_case(&expected) {
            return Err(Error::ContractMismatch {
                expected,
                found: core_fingerprint.to_string(),
            });
        }

        Ok(())
    }

    /// JSON manifest for glue generators
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        value["fingerprint"] = serde_json::Value::String(self.fingerprint());
        Ok(value)
    }

    /// Parse a manifest emitted by [`ContractManifest::to_json`]
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Raw {
            namespace: String,
            abi_version: String,
            functions: Vec<ExportedFunction>,
            errors: Vec<ErrorKindSpec>,
        }

        let raw: Raw = serde_json::from_value(value.clone())?;
        Self::new(&raw.namespace, &raw.abi_version, raw.functions, raw.errors)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_contract(version: &str) -> ContractManifest {
        ContractManifest::new(
            "test",
            version,
            vec![
                ExportedFunction::sync(1, "make")
                    .arg("name", TypeTag::String)
                    .returns(TypeTag::Handle(HandleKind::Client)),
                ExportedFunction::asynchronous(2, "poke").on(HandleKind::Client),
            ],
            vec![ErrorKindSpec {
                code: 1,
                name: "generic".into(),
                recoverable: false,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_type_tag_matches() {
        assert!(TypeTag::String.matches(&json!("wss://relay.damus.io")));
        assert!(!TypeTag::String.matches(&json!(1)));
        assert!(TypeTag::Bytes.matches(&json!([0, 255, 12])));
        assert!(!TypeTag::Bytes.matches(&json!([256])));
        assert!(TypeTag::optional(TypeTag::U64).matches(&json!(null)));
        assert!(TypeTag::list(TypeTag::Json).matches(&json!([{"kind": 1}, 3])));
        assert!(TypeTag::I64.matches(&json!(-5)));
        assert!(TypeTag::I64.matches(&json!(5)));
        assert!(TypeTag::Unit.matches(&json!(null)));
    }

    #[test]
    fn test_type_tag_display() {
        let ty = TypeTag::optional(TypeTag::list(TypeTag::Handle(HandleKind::EventStream)));
        assert_eq!(ty.to_string(), "optional<list<handle<event_stream>>>");
        assert_eq!(ty.handle_kind(), Some(HandleKind::EventStream));
    }

    #[test]
    fn test_duplicate_selector_rejected() {
        let result = ContractManifest::new(
            "test",
            "1.0.0",
            vec![
                ExportedFunction::sync(1, "a"),
                ExportedFunction::sync(1, "b"),
            ],
            vec![],
        );
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_fingerprint_tracks_signature_changes() {
        let base = small_contract("1.0.0");
        let changed = ContractManifest::new(
            "test",
            "1.0.0",
            vec![
                ExportedFunction::sync(1, "make")
                    .arg("name", TypeTag::Bytes)
                    .returns(TypeTag::Handle(HandleKind::Client)),
                ExportedFunction::asynchronous(2, "poke").on(HandleKind::Client),
            ],
            base.errors.clone(),
        )
        .unwrap();

        assert_eq!(base.fingerprint(), small_contract("1.0.0").fingerprint());
        assert_ne!(base.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn test_check_compatible() {
        let contract = small_contract("1.0.0");
        let fp = contract.fingerprint();

        assert!(contract.check_compatible("1.0.0", &fp).is_ok());
        assert!(matches!(
            contract.check_compatible("1.0.1", &fp),
            Err(Error::VersionMismatch { .. })
        ));
        assert!(matches!(
            contract.check_compatible("1.0.0", "deadbeef"),
            Err(Error::ContractMismatch { .. })
        ));
    }

    #[test]
    fn test_json_manifest_roundtrip_keeps_fingerprint() {
        let contract = small_contract("2.1.0");
        let value = contract.to_json().unwrap();
        assert_eq!(value["fingerprint"], json!(contract.fingerprint()));

        let parsed = ContractManifest::from_json(&value).unwrap();
        assert_eq!(parsed.fingerprint(), contract.fingerprint());
        assert_eq!(parsed.function("poke").map(|f| f.selector), Some(2));
    }
}
