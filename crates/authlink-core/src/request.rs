//! Request encoding seam.
//!
//! Building identity and signing requests is an external concern (ABI
//! resolution, compression, chain quirks). The handshake only needs the
//! result: an opaque string it can embed in an authenticator URL or
//! seal for transport, carrying the callback descriptor the
//! authenticator answers to.

use std::fmt;

use async_trait::async_trait;

use crate::channel::CallbackDescriptor;
use crate::types::{ChainId, PermissionLevel};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("could not build request: {0}")]
    Build(String),
    #[error("could not encode request: {0}")]
    Encode(String),
}

/// An encoded request ready for an authenticator URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRequest(String);

impl EncodedRequest {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for EncodedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arguments for an identity (login) request.
#[derive(Debug, Clone)]
pub struct IdentityRequestArgs {
    pub chain: ChainId,
    pub app_name: String,
    /// Permission the application wants, when it already knows.
    pub permission: Option<PermissionLevel>,
    pub callback: CallbackDescriptor,
}

/// Arguments for a transaction signing request.
#[derive(Debug, Clone)]
pub struct SigningRequestArgs {
    pub chain: ChainId,
    pub transaction: serde_json::Value,
    pub callback: CallbackDescriptor,
    /// Always false on the sign path: the application broadcasts,
    /// the authenticator only returns signatures.
    pub broadcast: bool,
}

/// Builds the opaque request payloads the authenticator consumes.
#[async_trait]
pub trait RequestCodec: Send + Sync {
    async fn identity_request(
        &self,
        args: IdentityRequestArgs,
    ) -> Result<EncodedRequest, CodecError>;

    async fn signing_request(&self, args: SigningRequestArgs)
        -> Result<EncodedRequest, CodecError>;
}
