//! Key holder handed to a client

use crate::adapter::Adapter;
use crate::contract::HandleKind;
use crate::error::Result;
use crate::handle::NativeHandle;

/// Native signer
///
/// The secret key is passed through to the core untouched and never kept
/// on this side.
#[derive(Debug, Clone)]
pub struct Signer {
    adapter: Adapter,
    handle: NativeHandle,
}

impl Signer {
    /// Signer for a hex secret key
    pub fn from_secret_key(adapter: &Adapter, secret_key: &str) -> Result<Self> {
        let id = adapter.call("signer_from_secret_key", None, vec![secret_key.into()])?;
        Ok(Self {
            adapter: adapter.clone(),
            handle: adapter.adopt(HandleKind::Signer, &id)?,
        })
    }

    /// Hex public key
    pub async fn public_key(&self) -> Result<String> {
        let value = self
            .adapter
            .call_async("signer_public_key", Some(&self.handle), vec![])?
            .await?;
        super::typed("signer_public_key", value)
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    /// Release the native signer now
    pub fn dispose(&self) -> Result<()> {
        self.handle.dispose()
    }
}
