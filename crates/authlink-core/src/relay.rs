#![cfg(feature = "http-relay")]

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use crate::channel::{channel_url, CallbackDescriptor, ChannelError, ChannelId, ResponseChannel};

/// Client for the hosted relay. POST delivers a payload into the
/// channel's mailbox, GET long-polls it in slices until the caller's
/// deadline runs out. The relay service the descriptor points at is
/// decided per request, so one client serves any number of links.
#[derive(Clone)]
pub struct RelayChannel {
    client: reqwest::Client,
    /// Upper bound for a single long-poll request.
    poll_slice: Duration,
}

impl RelayChannel {
    pub fn new() -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| ChannelError::Http(e.to_string()))?;
        Ok(Self {
            client,
            poll_slice: Duration::from_secs(10),
        })
    }

    /// POST payload bytes to the channel mailbox.
    async fn post(&self, url: String, payload: &[u8]) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(url)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if resp.status() == StatusCode::ACCEPTED {
            Ok(())
        } else {
            Err(ChannelError::BadResponse(format!(
                "status={} body={:?}",
                resp.status(),
                resp.text().await.ok()
            )))
        }
    }

    /// Long-poll: GET the next payload for this channel. Returns None on 204.
    async fn poll(
        &self,
        service: &url::Url,
        channel: &ChannelId,
        wait_ms: u64,
    ) -> Result<Option<Bytes>, ChannelError> {
        let mut url = channel_url(service, channel);
        url.push_str(&format!("?wait_ms={}", wait_ms));

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => {
                let b = resp
                    .bytes()
                    .await
                    .map_err(|e| ChannelError::Http(e.to_string()))?;
                Ok(Some(Bytes::from(b.to_vec())))
            }
            StatusCode::NO_CONTENT => Ok(None),
            other => Err(ChannelError::BadResponse(format!(
                "status={} body={:?}",
                other,
                resp.text().await.ok()
            ))),
        }
    }
}

fn relay_parts(descriptor: &CallbackDescriptor) -> Result<(&url::Url, &ChannelId), ChannelError> {
    match descriptor {
        CallbackDescriptor::Relay { service, channel } => Ok((service, channel)),
        CallbackDescriptor::WindowMessage { .. } => Err(ChannelError::BadResponse(
            "relay client needs a relay descriptor".into(),
        )),
    }
}

#[async_trait]
impl ResponseChannel for RelayChannel {
    async fn send(
        &self,
        descriptor: &CallbackDescriptor,
        payload: Bytes,
    ) -> Result<(), ChannelError> {
        let (service, channel) = relay_parts(descriptor)?;
        self.post(channel_url(service, channel), &payload).await
    }

    async fn receive(
        &self,
        descriptor: &CallbackDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, ChannelError> {
        let (service, channel) = relay_parts(descriptor)?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout);
            }
            let slice = remaining.min(self.poll_slice);
            match self.poll(service, channel, slice.as_millis() as u64).await? {
                Some(payload) => return Ok(payload),
                None => continue,
            }
        }
    }
}
