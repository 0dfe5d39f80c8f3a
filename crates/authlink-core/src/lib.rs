//! Authlink Core - Handshake between an application and an external web
//! authenticator.
//!
//! This crate implements:
//! - The login and sign flows (popup plus response channel, raced
//!   against user cancellation and a deadline)
//! - Popup lifecycle: open, closed-detection, manual-trigger fallback
//!   when the platform blocks automatic opens
//! - Response channel abstraction with relay and direct-message
//!   strategies
//! - Request sealing for the sign path (ECDH-derived AES-256-CBC)
//! - Session key material bridging login to sign

#![forbid(unsafe_code)]

// Orchestration
pub mod handshake;

// Platform capabilities
pub mod popup;
pub mod ui;

// Response transports
pub mod channel;
pub mod direct;

// Request encoding
pub mod request;

// Supporting modules
pub mod errors;
pub mod types;
pub mod harness;

// Optional transport implementations
#[cfg(feature = "http-relay")]
pub mod relay;

pub use channel::{CallbackDescriptor, CallbackMode, ChannelId, ResponseChannel};
pub use errors::{HandshakeError, LoginError, SignError};
pub use handshake::{LinkOptions, LoginContext, TransactContext, WebAuthenticatorLink};
pub use types::{
    CallbackPayload, ChainDefinition, ChainId, IdentityProof, LoginResult, PermissionLevel,
    ResolvedTransaction, SessionKeys, SignResult,
};
