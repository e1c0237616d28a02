//! # Call Descriptor
//!
//! The marshaled form of one cross-boundary call. Built by
//! [`marshal::encode_call`](crate::marshal::encode_call), handed to the core,
//! filled with the returned envelope, then consumed by unmarshaling.

use crate::contract::TypeTag;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::ffi::NO_HANDLE;

/// One call across the boundary
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Selector from the contract
    pub selector: u32,
    /// Function name, for logs and errors
    pub function: String,
    /// Receiver handle id (`NO_HANDLE` for free functions)
    pub handle: u64,
    /// JSON array of arguments
    pub args: Vec<u8>,
    /// Declared return type
    pub returns: TypeTag,
    result: Option<Envelope>,
}

impl CallDescriptor {
    /// Build a descriptor from already-validated parts
    pub fn new(
        selector: u32,
        function: impl Into<String>,
        handle: Option<u64>,
        args: Vec<u8>,
        returns: TypeTag,
    ) -> Self {
        Self {
            selector,
            function: function.into(),
            handle: handle.unwrap_or(NO_HANDLE),
            args,
            returns,
            result: None,
        }
    }

    /// Receiver, if any
    pub fn receiver(&self) -> Option<u64> {
        (self.handle != NO_HANDLE).then_some(self.handle)
    }

    /// Store the core's envelope
    pub fn complete(&mut self, envelope: Envelope) {
        self.result = Some(envelope);
    }

    /// Whether the core has answered
    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Consume the descriptor, decoding and type-checking the result
    pub fn unmarshal(self) -> Result<serde_json::Value> {
        let envelope = self.result.ok_or_else(|| {
            Error::Internal(format!("`{}` unmarshaled before completion", self.function))
        })?;
        crate::marshal::decode_return(&self.function, &self.returns, envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_receiver_none_for_free_functions() {
        let d = CallDescriptor::new(40, "init_logger", None, b"[\"info\"]".to_vec(), TypeTag::Unit);
        assert_eq!(d.handle, NO_HANDLE);
        assert_eq!(d.receiver(), None);
    }

    #[test]
    fn test_unmarshal_before_complete_is_internal_error() {
        let d = CallDescriptor::new(5, "client_connect", Some(3), b"[]".to_vec(), TypeTag::Unit);
        assert!(matches!(d.unmarshal(), Err(Error::Internal(_))));
    }

    #[test]
    fn test_unmarshal_checks_return_type() {
        let mut d = CallDescriptor::new(2, "client_add_relay", Some(3), b"[]".to_vec(), TypeTag::Bool);
        d.complete(Envelope::success(&json!(true)));
        assert!(d.is_complete());
        assert_eq!(d.unmarshal().unwrap(), json!(true));

        let mut d = CallDescriptor::new(2, "client_add_relay", Some(3), b"[]".to_vec(), TypeTag::Bool);
        d.complete(Envelope::success(&json!("yes")));
        assert!(matches!(d.unmarshal(), Err(Error::ReturnType { .. })));
    }
}
