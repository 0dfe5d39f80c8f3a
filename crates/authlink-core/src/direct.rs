//! Direct window-message transport for same-context deployments.
//!
//! When the authenticator page runs in a window the application itself
//! opened, the response comes back as a message event instead of through
//! a relay. Origin verification is the security boundary here: events
//! from any other origin are dropped without surfacing anything to the
//! caller. A channel tag narrows matching further when the sender
//! includes one; untagged events match on origin alone.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

use crate::channel::{CallbackDescriptor, ChannelError, ResponseChannel};

/// One message event on the bus.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    /// Origin of the sender, scheme://host\[:port\].
    pub origin: String,
    /// Channel tag when the sender correlates responses. Untagged
    /// messages match on origin alone.
    pub channel: Option<String>,
    /// Payload bytes, JSON on this protocol.
    pub data: Bytes,
}

/// In-process stand-in for the platform's message-event stream.
///
/// The authenticator side publishes, [`WindowChannel`] subscribes. A
/// broadcast bus means a receiver only sees events published while it is
/// subscribed, which is how message events behave.
#[derive(Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<WindowMessage>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers saw it.
    pub fn publish(&self, message: WindowMessage) -> usize {
        self.sender.send(message).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WindowMessage> {
        self.sender.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Direct-message strategy: resolve the first event whose origin (and
/// channel tag, when present) matches the descriptor.
pub struct WindowChannel {
    bus: MessageBus,
}

impl WindowChannel {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus }
    }
}

fn window_parts(descriptor: &CallbackDescriptor) -> Result<(&str, &str), ChannelError> {
    match descriptor {
        CallbackDescriptor::WindowMessage { origin, channel } => {
            Ok((origin.as_str(), channel.as_str()))
        }
        CallbackDescriptor::Relay { .. } => Err(ChannelError::BadResponse(
            "window channel needs a window-message descriptor".into(),
        )),
    }
}

#[async_trait]
impl ResponseChannel for WindowChannel {
    async fn send(
        &self,
        descriptor: &CallbackDescriptor,
        payload: Bytes,
    ) -> Result<(), ChannelError> {
        let (origin, channel) = window_parts(descriptor)?;
        self.bus.publish(WindowMessage {
            origin: origin.to_string(),
            channel: Some(channel.to_string()),
            data: payload,
        });
        Ok(())
    }

    async fn receive(
        &self,
        descriptor: &CallbackDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, ChannelError> {
        let (expected_origin, expected_channel) = window_parts(descriptor)?;

        // Subscribe before waiting so nothing published in between can
        // slip past.
        let mut events = self.bus.subscribe();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(message) => {
                        if message.origin != expected_origin {
                            warn!(
                                origin = %message.origin,
                                "dropping window message from unexpected origin"
                            );
                            continue;
                        }
                        if let Some(tag) = &message.channel {
                            if tag != expected_channel {
                                continue;
                            }
                        }
                        return Ok(message.data);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ChannelError::Closed)
                    }
                },
                _ = &mut deadline => return Err(ChannelError::Timeout),
            }
        }
    }
}
