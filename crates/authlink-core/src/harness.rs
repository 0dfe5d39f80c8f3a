//! Test harness for the handshake flows.
//!
//! This module provides scripted stand-ins for every capability the
//! orchestrator touches: the popup surface, the response channel, the
//! request codec, and the UI. Tests wire them into a [`TestRig`] and
//! play the authenticator side by answering opened windows.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use url::Url;

use authlink_crypto::PublicKey;

use crate::channel::{CallbackDescriptor, CallbackMode, ChannelError, ChannelId, ResponseChannel};
use crate::handshake::{LinkOptions, LoginContext, TransactContext, WebAuthenticatorLink};
use crate::popup::{FlagHandle, PopupDimensions, PopupError, PopupHandle, PopupSurface};
use crate::request::{
    CodecError, EncodedRequest, IdentityRequestArgs, RequestCodec, SigningRequestArgs,
};
use crate::types::{ChainDefinition, ChainId};
use crate::ui::{PromptArgs, PromptResponse, UiError, UserInterface};

pub const TEST_CHAIN_ID: &str = "73e4385a2708e6d7048834fbc1079f2fabb17b3c125b146af438971e90716c4d";
pub const TEST_SIGNATURE: &str = "SIG_K1_KBub1qmdiPpWA2XKKEZEG3EfKJBf38GETHzbd2tioh9zi7DiVB";

pub fn test_chain() -> ChainDefinition {
    ChainDefinition::new(ChainId::from_hex(TEST_CHAIN_ID).expect("chain id"), "jungle4")
}

/// Callback payload a login exchange would deliver.
pub fn login_payload(link_key: &PublicKey) -> serde_json::Value {
    serde_json::json!({
        "cid": TEST_CHAIN_ID,
        "sa": "wharfkit1131",
        "sp": "test",
        "link_key": link_key.to_string(),
        "sig": TEST_SIGNATURE,
    })
}

/// Callback payload a sign exchange would deliver.
pub fn sign_payload(signature: &str) -> serde_json::Value {
    serde_json::json!({
        "cid": TEST_CHAIN_ID,
        "sa": "wharfkit1131",
        "sp": "test",
        "sig": signature,
        "tx": "01234567890123456789",
        "rbn": "1234",
        "rid": "5678",
        "ex": "2020-01-01T00:00:00.000",
        "req": "mock-request-encoded",
        "callback": "https://example.com/callback",
    })
}

// ============================================================================
// Popup surface
// ============================================================================

/// What the platform does on the next `open` call.
#[derive(Debug, Clone, Copy)]
pub enum OpenOutcome {
    /// Open a window and hand back a live handle.
    Window,
    /// Report the popup blocked.
    Blocked,
}

/// A window the surface opened, with the URL it was pointed at.
#[derive(Debug)]
pub struct OpenedWindow {
    pub url: Url,
    pub handle: Arc<FlagHandle>,
}

impl OpenedWindow {
    /// Query parameter from the opened URL.
    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Scripted popup surface. Plays outcomes in order, defaults to opening
/// a window once the script runs out, and reports every opened window
/// on a stream.
pub struct ScriptedSurface {
    outcomes: Mutex<VecDeque<OpenOutcome>>,
    opened: mpsc::UnboundedSender<OpenedWindow>,
}

impl ScriptedSurface {
    pub fn scripted(
        outcomes: Vec<OpenOutcome>,
    ) -> (Self, mpsc::UnboundedReceiver<OpenedWindow>) {
        let (opened, windows) = mpsc::unbounded_channel();
        (
            Self {
                outcomes: Mutex::new(outcomes.into()),
                opened,
            },
            windows,
        )
    }

    /// A surface that opens every window, window stream discarded.
    pub fn always_open() -> Self {
        Self::scripted(Vec::new()).0
    }
}

#[async_trait]
impl PopupSurface for ScriptedSurface {
    async fn open(
        &self,
        url: &str,
        _window_name: &str,
        _dimensions: PopupDimensions,
    ) -> Result<Option<Arc<dyn PopupHandle>>, PopupError> {
        let outcome = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or(OpenOutcome::Window);
        match outcome {
            OpenOutcome::Blocked => Ok(None),
            OpenOutcome::Window => {
                let url = Url::parse(url).map_err(|e| PopupError::Platform(e.to_string()))?;
                let handle = FlagHandle::new();
                let _ = self.opened.send(OpenedWindow {
                    url,
                    handle: Arc::clone(&handle),
                });
                Ok(Some(handle as Arc<dyn PopupHandle>))
            }
        }
    }
}

// ============================================================================
// Response channels
// ============================================================================

/// In-process response channel keyed by channel id. Works with either
/// descriptor variant, which makes it the default transport for flow
/// tests.
#[derive(Default)]
pub struct MemoryChannel {
    boxes: Mutex<HashMap<String, VecDeque<Bytes>>>,
    notify: Notify,
}

#[async_trait]
impl ResponseChannel for MemoryChannel {
    async fn send(
        &self,
        descriptor: &CallbackDescriptor,
        payload: Bytes,
    ) -> Result<(), ChannelError> {
        self.boxes
            .lock()
            .expect("boxes lock")
            .entry(descriptor.channel().as_str().to_string())
            .or_default()
            .push_back(payload);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        descriptor: &CallbackDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, ChannelError> {
        let key = descriptor.channel().as_str().to_string();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            // Arm the waiter before checking so a send between the
            // check and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(payload) = self
                .boxes
                .lock()
                .expect("boxes lock")
                .get_mut(&key)
                .and_then(|queue| queue.pop_front())
            {
                return Ok(payload);
            }
            tokio::select! {
                _ = notified => continue,
                _ = &mut deadline => return Err(ChannelError::Timeout),
            }
        }
    }
}

/// Never delivers anything; receive waits out its timeout.
pub struct SilentChannel;

#[async_trait]
impl ResponseChannel for SilentChannel {
    async fn send(
        &self,
        _descriptor: &CallbackDescriptor,
        _payload: Bytes,
    ) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn receive(
        &self,
        _descriptor: &CallbackDescriptor,
        timeout: Duration,
    ) -> Result<Bytes, ChannelError> {
        tokio::time::sleep(timeout).await;
        Err(ChannelError::Timeout)
    }
}

// ============================================================================
// Codec and UI
// ============================================================================

/// Encodes request args as JSON so tests can read back exactly what
/// would have gone to a real signing-request encoder.
pub struct JsonCodec;

#[async_trait]
impl RequestCodec for JsonCodec {
    async fn identity_request(
        &self,
        args: IdentityRequestArgs,
    ) -> Result<EncodedRequest, CodecError> {
        let value = serde_json::json!({
            "identity": {
                "chain": args.chain.to_string(),
                "permission": args.permission.as_ref().map(|p| p.to_string()),
            },
            "app": args.app_name,
            "callback": args.callback.callback_url(),
        });
        Ok(EncodedRequest::new(value.to_string()))
    }

    async fn signing_request(
        &self,
        args: SigningRequestArgs,
    ) -> Result<EncodedRequest, CodecError> {
        let value = serde_json::json!({
            "chain": args.chain.to_string(),
            "tx": args.transaction,
            "broadcast": args.broadcast,
            "callback": args.callback.callback_url(),
        });
        Ok(EncodedRequest::new(value.to_string()))
    }
}

/// Accepts every prompt immediately and records what it saw.
#[derive(Default)]
pub struct AutoTriggerUi {
    pub statuses: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<PromptArgs>>,
}

impl AutoTriggerUi {
    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

#[async_trait]
impl UserInterface for AutoTriggerUi {
    fn status(&self, text: &str) {
        self.statuses
            .lock()
            .expect("statuses lock")
            .push(text.to_string());
    }

    async fn prompt(&self, args: PromptArgs) -> Result<PromptResponse, UiError> {
        self.prompts.lock().expect("prompts lock").push(args);
        Ok(PromptResponse)
    }
}

/// Ignores status text and dismisses every prompt.
pub struct NullUi;

#[async_trait]
impl UserInterface for NullUi {
    fn status(&self, _text: &str) {}

    async fn prompt(&self, _args: PromptArgs) -> Result<PromptResponse, UiError> {
        Err(UiError::Dismissed)
    }
}

// ============================================================================
// Rig
// ============================================================================

/// Login context with the standard test chain and JSON codec.
pub fn login_context(ui: &Arc<AutoTriggerUi>) -> LoginContext {
    LoginContext {
        chain: test_chain(),
        permission: None,
        ui: Arc::clone(ui) as Arc<dyn UserInterface>,
        codec: Arc::new(JsonCodec),
    }
}

/// Transact context with the standard test chain and JSON codec.
pub fn transact_context(ui: &Arc<AutoTriggerUi>) -> TransactContext {
    TransactContext {
        chain: test_chain(),
        ui: Arc::clone(ui) as Arc<dyn UserInterface>,
        codec: Arc::new(JsonCodec),
    }
}

/// Rebuild the relay descriptor a login or sign URL asked the
/// authenticator to answer to.
pub fn relay_descriptor_from(window: &OpenedWindow, service: &Url) -> CallbackDescriptor {
    CallbackDescriptor::Relay {
        service: service.clone(),
        channel: ChannelId::from_string(window.param("channel").unwrap_or_default()),
    }
}

/// The authenticator side of a test rig: the stream of opened windows
/// plus the channel to answer on.
pub struct RigAuthenticator {
    pub windows: mpsc::UnboundedReceiver<OpenedWindow>,
    pub channel: Arc<MemoryChannel>,
    pub service: Url,
}

impl RigAuthenticator {
    pub async fn next_window(&mut self) -> OpenedWindow {
        self.windows.recv().await.expect("a window should open")
    }

    pub async fn answer(&self, window: &OpenedWindow, payload: serde_json::Value) {
        let descriptor = relay_descriptor_from(window, &self.service);
        self.channel
            .send(&descriptor, Bytes::from(payload.to_string()))
            .await
            .expect("deliver payload");
    }

    /// Wait for the next window and answer it in one step.
    pub async fn answer_next_window(&mut self, payload: serde_json::Value) -> OpenedWindow {
        let window = self.next_window().await;
        self.answer(&window, payload).await;
        window
    }
}

/// A link wired to a memory channel and a scripted surface, in relay
/// callback mode so opened URLs carry their channel id.
pub struct TestRig {
    pub link: WebAuthenticatorLink,
    pub ui: Arc<AutoTriggerUi>,
    pub authenticator: RigAuthenticator,
}

impl TestRig {
    pub fn new(outcomes: Vec<OpenOutcome>) -> Self {
        Self::with_response_timeout(outcomes, Duration::from_secs(5))
    }

    pub fn with_response_timeout(outcomes: Vec<OpenOutcome>, timeout: Duration) -> Self {
        let (surface, windows) = ScriptedSurface::scripted(outcomes);
        let channel = Arc::new(MemoryChannel::default());
        let service = Url::parse("https://cb.test").expect("service url");
        let options = LinkOptions::new(Url::parse("https://auth.test").expect("auth url"), "testapp")
            .with_callback(CallbackMode::Relay {
                service: service.clone(),
            })
            .with_response_timeout(timeout)
            .with_close_poll_interval(Duration::from_millis(20))
            .with_prompt_timeout(Duration::from_secs(2));
        let link = WebAuthenticatorLink::new(
            options,
            Arc::clone(&channel) as Arc<dyn ResponseChannel>,
            Arc::new(surface),
        );
        Self {
            link,
            ui: Arc::new(AutoTriggerUi::default()),
            authenticator: RigAuthenticator {
                windows,
                channel,
                service,
            },
        }
    }

    pub fn login_context(&self) -> LoginContext {
        login_context(&self.ui)
    }

    pub fn transact_context(&self) -> TransactContext {
        transact_context(&self.ui)
    }
}
