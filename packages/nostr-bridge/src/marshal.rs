//! # Marshaling
//!
//! Turns host arguments into a [`CallDescriptor`] and core results back into
//! values, checking both against the contract signature.
//!
//! ```text
//!  host args ──► type check ──► JSON array ──► CallDescriptor ──► core
//!                                                                  │
//!  host value ◄── return check ◄── Envelope::into_value ◄─────────┘
//! ```
//!
//! Handles travel as their `u64` id. The adapter keeps a lease on every
//! handle it sends so none of them can be released while the core holds the
//! id. A handle slot only takes a [`NativeHandle`] (or `null` when optional);
//! a raw id would skip the liveness and kind checks.

use serde_json::Value;

use crate::contract::{json_shape, ExportedFunction, HandleKind, TypeTag};
use crate::descriptor::CallDescriptor;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::handle::{HandleLease, NativeHandle};

/// One argument as supplied by the host
#[derive(Debug, Clone)]
pub enum CallArg {
    /// Plain value
    Json(Value),
    /// Native object reference
    Handle(NativeHandle),
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self {
        CallArg::Json(value)
    }
}

impl From<&str> for CallArg {
    fn from(value: &str) -> Self {
        CallArg::Json(Value::String(value.to_string()))
    }
}

impl From<String> for CallArg {
    fn from(value: String) -> Self {
        CallArg::Json(Value::String(value))
    }
}

impl From<bool> for CallArg {
    fn from(value: bool) -> Self {
        CallArg::Json(Value::Bool(value))
    }
}

impl From<u64> for CallArg {
    fn from(value: u64) -> Self {
        CallArg::Json(Value::from(value))
    }
}

impl From<&NativeHandle> for CallArg {
    fn from(handle: &NativeHandle) -> Self {
        CallArg::Handle(handle.clone())
    }
}

impl From<Option<&NativeHandle>> for CallArg {
    fn from(handle: Option<&NativeHandle>) -> Self {
        match handle {
            Some(handle) => CallArg::Handle(handle.clone()),
            None => CallArg::Json(Value::Null),
        }
    }
}

/// A descriptor plus the leases that keep its handles alive
pub(crate) struct Marshaled {
    pub descriptor: CallDescriptor,
    pub leases: Vec<HandleLease>,
    /// Receiver, when it must be serialized
    pub receiver: Option<NativeHandle>,
}

/// Build a call descriptor for `function`
pub(crate) fn encode_call(
    function: &ExportedFunction,
    receiver: Option<&NativeHandle>,
    args: Vec<CallArg>,
) -> Result<Marshaled> {
    let mut leases = Vec::with_capacity(args.len() + 1);

    let receiver_id = match (function.receiver, receiver) {
        (Some(kind), Some(handle)) => {
            handle.expect_kind(kind)?;
            leases.push(handle.lease()?);
            Some(handle.id())
        }
        (None, None) => None,
        (Some(kind), None) => {
            return Err(Error::ArgumentType {
                function: function.name.clone(),
                index: 0,
                expected: format!("receiver handle<{}>", kind),
                found: "nothing".into(),
            }
            .surfaced());
        }
        (None, Some(handle)) => {
            return Err(Error::ArgumentType {
                function: function.name.clone(),
                index: 0,
                expected: "no receiver".into(),
                found: format!("handle<{}>", handle.kind()),
            }
            .surfaced());
        }
    };

    if args.len() != function.args.len() {
        return Err(Error::ArgumentCount {
            function: function.name.clone(),
            expected: function.args.len(),
            found: args.len(),
        }
        .surfaced());
    }

    let mut values = Vec::with_capacity(args.len());
    for (index, (arg, spec)) in args.into_iter().zip(&function.args).enumerate() {
        let value = match arg {
            CallArg::Handle(handle) => {
                let expected = spec.ty.handle_kind().ok_or_else(|| {
                    Error::ArgumentType {
                        function: function.name.clone(),
                        index,
                        expected: spec.ty.to_string(),
                        found: format!("handle<{}>", handle.kind()),
                    }
                    .surfaced()
                })?;
                check_handle_kind(&function.name, index, &handle, expected)?;
                leases.push(handle.lease()?);
                Value::from(handle.id())
            }
            CallArg::Json(value) => {
                let raw_id = spec.ty.handle_kind().is_some() && !value.is_null();
                if raw_id || !spec.ty.matches(&value) {
                    return Err(Error::ArgumentType {
                        function: function.name.clone(),
                        index,
                        expected: spec.ty.to_string(),
                        found: json_shape(&value).to_string(),
                    }
                    .surfaced());
                }
                value
            }
        };
        values.push(value);
    }

    let args = serde_json::to_vec(&Value::Array(values))?;

    Ok(Marshaled {
        descriptor: CallDescriptor::new(
            function.selector,
            function.name.clone(),
            receiver_id,
            args,
            function.returns.clone(),
        ),
        leases,
        receiver: receiver.cloned(),
    })
}

fn check_handle_kind(function: &str, index: usize, handle: &NativeHandle, expected: HandleKind) -> Result<()> {
    if handle.kind() != expected {
        return Err(Error::ArgumentType {
            function: function.to_string(),
            index,
            expected: format!("handle<{}>", expected),
            found: format!("handle<{}>", handle.kind()),
        }
        .surfaced());
    }
    Ok(())
}

/// Decode an envelope and check it against the declared return type
pub(crate) fn decode_return(function: &str, returns: &TypeTag, envelope: Envelope) -> Result<Value> {
    let value = envelope.into_value()?;
    if !returns.matches(&value) {
        return Err(Error::ReturnType {
            function: function.to_string(),
            expected: returns.to_string(),
            found: json_shape(&value).to_string(),
        }
        .surfaced());
    }
    Ok(value)
}

/// Decode the argument array of an incoming call (core side)
pub(crate) fn decode_args(function: &ExportedFunction, bytes: &[u8]) -> Result<Vec<Value>> {
    let value: Value = if bytes.is_empty() {
        Value::Array(Vec::new())
    } else {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidPayload(format!("arguments are not JSON: {}", e)))?
    };

    let Value::Array(values) = value else {
        return Err(Error::InvalidPayload(format!(
            "`{}` arguments must be a JSON array",
            function.name
        )));
    };

    if values.len() != function.args.len() {
        return Err(Error::ArgumentCount {
            function: function.name.clone(),
            expected: function.args.len(),
            found: values.len(),
        });
    }

    for (index, (value, spec)) in values.iter().zip(&function.args).enumerate() {
        if !spec.ty.matches(value) {
            return Err(Error::ArgumentType {
                function: function.name.clone(),
                index,
                expected: spec.ty.to_string(),
                found: json_shape(value).to_string(),
            });
        }
    }

    Ok(values)
}
