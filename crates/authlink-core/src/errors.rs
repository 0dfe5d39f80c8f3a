//! Error taxonomy for the handshake.
//!
//! Lower-level failures (popup plumbing, channel transport, request
//! encoding, sealing, response validation) fold into [`HandshakeError`].
//! The `login` and `sign` boundaries each wrap that in a single domain
//! failure so callers always see one shape per operation with the
//! cause's message preserved.

use thiserror::Error;

use authlink_crypto::CryptoError;

use crate::channel::ChannelError;
use crate::popup::PopupError;
use crate::request::CodecError;
use crate::ui::UiError;

/// Everything that can go wrong between building a request and
/// validating its response.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The platform refused the popup and the manual-trigger fallback
    /// was exhausted, declined, or timed out.
    #[error("popup blocked - please enable popups for this site")]
    PopupBlocked,

    /// The user closed the authenticator window before responding.
    #[error("authentication cancelled")]
    UserCancelled,

    /// No response arrived within the deadline.
    #[error("timed out waiting for the authenticator response")]
    Timeout,

    /// A response arrived but failed validation.
    #[error("{0}")]
    ValidationFailed(String),

    /// The call sequence is wrong, e.g. sign before login.
    #[error("{0}")]
    Usage(String),

    /// The platform RNG failed while minting a nonce.
    #[error("rng failed")]
    Rng,

    /// Sealing or key material failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Transport failure underneath the response race.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Popup plumbing failure other than a block.
    #[error("popup error: {0}")]
    Popup(#[from] PopupError),

    /// Building or encoding the request failed.
    #[error("request encoding error: {0}")]
    Codec(#[from] CodecError),

    /// The manual-trigger prompt failed outright.
    #[error("ui error: {0}")]
    Ui(#[from] UiError),
}

/// Failure shape of `login`. The underlying cause stays reachable
/// through `source`.
#[derive(Debug, Error)]
#[error("Login failed: {source}")]
pub struct LoginError {
    #[from]
    source: HandshakeError,
}

impl LoginError {
    pub fn cause(&self) -> &HandshakeError {
        &self.source
    }
}

/// Failure shape of `sign`.
#[derive(Debug, Error)]
#[error("Signing failed: {source}")]
pub struct SignError {
    #[from]
    source: HandshakeError,
}

impl SignError {
    pub fn cause(&self) -> &HandshakeError {
        &self.source
    }
}
