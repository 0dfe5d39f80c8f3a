//! Response channels: how the authenticator's callback payload travels
//! back to the application.
//!
//! Two interchangeable strategies share one trait. A hosted relay
//! mailbox addressed by an unguessable channel id ([`relay::RelayChannel`]
//! behind the `http-relay` feature), and same-context window messaging
//! filtered by origin ([`direct::WindowChannel`]). The orchestrator only
//! sees [`ResponseChannel`].
//!
//! [`relay::RelayChannel`]: crate::relay::RelayChannel
//! [`direct::WindowChannel`]: crate::direct::WindowChannel

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use getrandom::getrandom;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No message arrived within the receive window. The channel stays
    /// usable for a later receive.
    #[error("timed out waiting for a channel message")]
    Timeout,
    /// The channel can never deliver again.
    #[error("channel closed")]
    Closed,
    /// Id minting needs entropy; surfaced when the platform RNG fails.
    #[error("rng failed")]
    Rng,
    #[error("http error: {0}")]
    Http(String),
    #[error("bad response: {0}")]
    BadResponse(String),
}

/// Correlation token for one request/response exchange.
///
/// Minted fresh and unpredictable per request and never reused: a reused
/// or guessable id would let a stale or foreign response settle the
/// wrong exchange. Ids are not derived from key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

impl ChannelId {
    /// Mint a fresh id from 32 random bytes, hex-encoded.
    pub fn fresh() -> Result<Self, ChannelError> {
        let mut bytes = [0u8; 32];
        getrandom(&mut bytes).map_err(|_| ChannelError::Rng)?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Adopt an id minted elsewhere, e.g. parsed back out of an
    /// authenticator URL on the responding side.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How responses travel back for a given link.
#[derive(Debug, Clone)]
pub enum CallbackMode {
    /// Hosted relay mailboxes under this service URL.
    Relay { service: Url },
    /// Same-context window messaging. Responses must originate from the
    /// authenticator's own origin.
    Direct,
}

/// Where the authenticator must deliver its response, minted fresh for
/// every request.
#[derive(Debug, Clone)]
pub enum CallbackDescriptor {
    /// Post to a relay mailbox; the application long-polls it.
    Relay { service: Url, channel: ChannelId },
    /// Post a message back into the opening context.
    WindowMessage { origin: String, channel: ChannelId },
}

impl CallbackDescriptor {
    pub fn channel(&self) -> &ChannelId {
        match self {
            CallbackDescriptor::Relay { channel, .. } => channel,
            CallbackDescriptor::WindowMessage { channel, .. } => channel,
        }
    }

    /// The URL an authenticator posts the payload to. `None` for the
    /// window-message strategy, which has no URL.
    pub fn callback_url(&self) -> Option<String> {
        match self {
            CallbackDescriptor::Relay { service, channel } => Some(channel_url(service, channel)),
            CallbackDescriptor::WindowMessage { .. } => None,
        }
    }
}

/// Mailbox URL for a channel id under a relay service.
pub(crate) fn channel_url(service: &Url, channel: &ChannelId) -> String {
    format!(
        "{}/v1/channel/{}",
        service.as_str().trim_end_matches('/'),
        channel
    )
}

/// Transport contract the orchestrator races against the popup.
///
/// `receive` delivers at most one payload per call, and a timeout leaves
/// the channel usable for a later call.
#[async_trait]
pub trait ResponseChannel: Send + Sync {
    /// Deliver a payload to the channel. This is the responder side.
    async fn send(&self, descriptor: &CallbackDescriptor, payload: Bytes)
        -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next payload on the channel.
    async fn receive(
        &self,
        descriptor: &CallbackDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, ChannelError>;
}
