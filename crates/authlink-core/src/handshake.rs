//! The handshake orchestrator.
//!
//! Two flows, `login` and `sign`, each one request/response exchange
//! with the external authenticator. The flow opens a popup (or falls
//! back to a manual trigger when the platform blocks it) and races
//! three outcomes: the response arriving on the channel, the user
//! closing the window, and the overall deadline. Whichever settles
//! first tears the other branches down before the call returns, so no
//! watcher, poll task, or timer outlives the flow.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use getrandom::getrandom;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use url::Url;

use authlink_crypto::{seal, PrivateKey, PublicKey};

use crate::channel::{CallbackDescriptor, CallbackMode, ChannelError, ChannelId, ResponseChannel};
use crate::errors::{HandshakeError, LoginError, SignError};
use crate::popup::{ClosedWatcher, PopupDimensions, PopupSurface};
use crate::request::{EncodedRequest, IdentityRequestArgs, RequestCodec, SigningRequestArgs};
use crate::types::{
    is_signature_shaped, CallbackPayload, ChainDefinition, ChainId, IdentityProof, LoginResult,
    PermissionLevel, ResolvedTransaction, SessionKeys, SignResult,
};
use crate::ui::{PromptArgs, UiError, UserInterface};

/// Tunables for a link. Durations are explicit so tests can shrink
/// them.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Base URL of the authenticator pages, e.g. `https://auth.example.com`.
    pub authenticator: Url,
    /// Display name the application announces to the authenticator.
    pub app_name: String,
    /// Window name for the popup.
    pub window_name: String,
    pub window_dimensions: PopupDimensions,
    /// How responses travel back.
    pub callback: CallbackMode,
    /// Overall deadline for one login or sign exchange.
    pub response_timeout: Duration,
    /// Poll interval for popup-closed detection.
    pub close_poll_interval: Duration,
    /// How long the manual-trigger prompt stays up before a blocked
    /// popup becomes a terminal failure.
    pub prompt_timeout: Duration,
}

impl LinkOptions {
    pub fn new(authenticator: Url, app_name: impl Into<String>) -> Self {
        Self {
            authenticator,
            app_name: app_name.into(),
            window_name: "Web Authenticator".to_string(),
            window_dimensions: PopupDimensions::default(),
            callback: CallbackMode::Direct,
            response_timeout: Duration::from_secs(120),
            close_poll_interval: Duration::from_secs(1),
            prompt_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_callback(mut self, callback: CallbackMode) -> Self {
        self.callback = callback;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_close_poll_interval(mut self, interval: Duration) -> Self {
        self.close_poll_interval = interval;
        self
    }

    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }
}

/// Everything `login` needs from the caller.
pub struct LoginContext {
    pub chain: ChainDefinition,
    /// Permission the application wants, when it already knows.
    pub permission: Option<PermissionLevel>,
    pub ui: Arc<dyn UserInterface>,
    pub codec: Arc<dyn RequestCodec>,
}

/// Everything `sign` needs from the caller.
pub struct TransactContext {
    pub chain: ChainDefinition,
    pub ui: Arc<dyn UserInterface>,
    pub codec: Arc<dyn RequestCodec>,
}

/// A link to the external web authenticator.
///
/// One instance per application session. `login` mints ephemeral keys
/// and stores the returned link key; `sign` requires them. Both flows
/// are plain async calls that settle exactly once.
pub struct WebAuthenticatorLink {
    options: LinkOptions,
    channel: Arc<dyn ResponseChannel>,
    surface: Arc<dyn PopupSurface>,
    session: RwLock<Option<SessionKeys>>,
}

impl WebAuthenticatorLink {
    pub fn new(
        options: LinkOptions,
        channel: Arc<dyn ResponseChannel>,
        surface: Arc<dyn PopupSurface>,
    ) -> Self {
        Self {
            options,
            channel,
            surface,
            session: RwLock::new(None),
        }
    }

    /// The session key material currently held, if any.
    pub async fn session_keys(&self) -> Option<SessionKeys> {
        self.session.read().await.clone()
    }

    /// Seed key material saved from an earlier session, so `sign` works
    /// without a fresh login.
    pub async fn restore_session(&self, keys: SessionKeys) {
        *self.session.write().await = Some(keys);
    }

    // ========================================================================
    // Login flow
    // ========================================================================

    /// Run the login exchange: mint ephemeral keys, send an identity
    /// request through the authenticator, validate the response, and
    /// store the session key material for later `sign` calls.
    pub async fn login(&self, context: LoginContext) -> Result<LoginResult, LoginError> {
        self.login_inner(context).await.map_err(LoginError::from)
    }

    async fn login_inner(&self, context: LoginContext) -> Result<LoginResult, HandshakeError> {
        let LoginContext {
            chain,
            permission,
            ui,
            codec,
        } = context;

        let request_key = PrivateKey::generate();
        let public_key = request_key.public_key();
        let descriptor = self.fresh_descriptor()?;
        debug!("starting login handshake on channel {}", descriptor.channel());

        ui.status("Preparing login request");
        let request = codec
            .identity_request(IdentityRequestArgs {
                chain: chain.id,
                app_name: self.options.app_name.clone(),
                permission,
                callback: descriptor.clone(),
            })
            .await?;

        let url = self.login_url(&request, &chain.id, &public_key, &descriptor)?;
        let raw = self.await_response(url.as_str(), &descriptor, ui.as_ref()).await?;

        ui.status("Validating the authenticator response");
        let payload: CallbackPayload = serde_json::from_slice(&raw).map_err(|e| {
            HandshakeError::ValidationFailed(format!("malformed callback payload: {}", e))
        })?;

        let cid = payload.cid.as_deref().ok_or_else(|| {
            HandshakeError::ValidationFailed("authenticator response missing chain ID".into())
        })?;
        let response_chain = ChainId::from_hex(cid).map_err(|_| {
            HandshakeError::ValidationFailed("authenticator response carries an invalid chain ID".into())
        })?;
        let actor = payload.sa.clone().ok_or_else(|| {
            HandshakeError::ValidationFailed("authenticator response missing signer account".into())
        })?;
        let signer_permission = payload.sp.clone().ok_or_else(|| {
            HandshakeError::ValidationFailed(
                "authenticator response missing signer permission".into(),
            )
        })?;

        match payload.link_key.as_deref() {
            Some(encoded) => {
                let link_key: PublicKey = encoded.parse().map_err(|_| {
                    HandshakeError::ValidationFailed(
                        "authenticator issued an unusable link key".into(),
                    )
                })?;
                *self.session.write().await = Some(SessionKeys {
                    request_key,
                    link_key,
                });
            }
            None => {
                debug!("login response carried no link key, sign stays unavailable");
            }
        }

        let identity_proof = payload.sig.clone().map(|signature| IdentityProof {
            signature,
            signed_request: request.clone(),
        });

        ui.status("Login approved");
        Ok(LoginResult {
            chain: response_chain,
            permission: PermissionLevel::new(actor, signer_permission),
            identity_proof,
        })
    }

    // ========================================================================
    // Sign flow
    // ========================================================================

    /// Run the sign exchange: seal a fresh signing request with the
    /// session keys, send it through the authenticator, and validate
    /// the returned signatures.
    pub async fn sign(
        &self,
        resolved: &ResolvedTransaction,
        context: TransactContext,
    ) -> Result<SignResult, SignError> {
        self.sign_inner(resolved, context)
            .await
            .map_err(SignError::from)
    }

    async fn sign_inner(
        &self,
        resolved: &ResolvedTransaction,
        context: TransactContext,
    ) -> Result<SignResult, HandshakeError> {
        let TransactContext { chain, ui, codec } = context;

        let keys = self
            .session_keys()
            .await
            .ok_or_else(|| HandshakeError::Usage("no session keys - login first".into()))?;

        let descriptor = self.fresh_descriptor()?;
        debug!("starting sign handshake on channel {}", descriptor.channel());

        ui.status("Preparing the transaction for signing");
        let request = codec
            .signing_request(SigningRequestArgs {
                chain: chain.id,
                transaction: resolved.transaction.clone(),
                callback: descriptor.clone(),
                broadcast: false,
            })
            .await?;

        let nonce = fresh_nonce()?;
        let sealed = seal(request.as_bytes(), &keys.request_key, &keys.link_key, nonce);
        let url = self.sign_url(
            &sealed,
            nonce,
            &chain.name,
            &resolved.signer,
            &keys.request_key.public_key(),
            &descriptor,
        )?;

        let raw = self.await_response(url.as_str(), &descriptor, ui.as_ref()).await?;

        ui.status("Validating the authenticator response");
        let payload: CallbackPayload = serde_json::from_slice(&raw)
            .map_err(|_| HandshakeError::ValidationFailed("no signatures returned".into()))?;

        let response_chain = payload
            .cid
            .as_deref()
            .and_then(|cid| ChainId::from_hex(cid).ok())
            .ok_or_else(|| HandshakeError::ValidationFailed("no signatures returned".into()))?;
        if response_chain != chain.id {
            return Err(HandshakeError::ValidationFailed(
                "authenticator responded for the wrong chain".into(),
            ));
        }

        let signatures: Vec<String> = payload
            .signatures()
            .into_iter()
            .filter(|s| is_signature_shaped(s))
            .collect();
        if signatures.is_empty() {
            return Err(HandshakeError::ValidationFailed(
                "no signatures returned".into(),
            ));
        }

        ui.status("Transaction signed");
        Ok(SignResult {
            signatures,
            resolved: resolved.clone(),
        })
    }

    // ========================================================================
    // The race
    // ========================================================================

    /// Open the authenticator window for `url` and wait for the first
    /// of: a response on the channel, the user closing the window, the
    /// deadline. A blocked popup gets one manual-trigger prompt; a
    /// second block in the same exchange fails outright.
    async fn await_response(
        &self,
        url: &str,
        descriptor: &CallbackDescriptor,
        ui: &dyn UserInterface,
    ) -> Result<Bytes, HandshakeError> {
        let deadline = tokio::time::sleep(self.options.response_timeout);
        tokio::pin!(deadline);

        // Start listening before the window opens so a fast response
        // cannot slip past the receiver.
        let channel = Arc::clone(&self.channel);
        let receive_descriptor = descriptor.clone();
        let receive_timeout = self.options.response_timeout;
        let mut receive = tokio::spawn(async move {
            channel.receive(&receive_descriptor, receive_timeout).await
        });

        let (closed_tx, mut closed_rx) = mpsc::channel::<()>(1);

        ui.status("Opening the authenticator window");
        let mut opened = self
            .surface
            .open(url, &self.options.window_name, self.options.window_dimensions)
            .await;

        // One manual trigger per exchange. The blocked state is not yet
        // a failure: the flow stays pending until the user acts, the
        // response arrives anyway, or the deadline passes.
        if matches!(opened, Ok(None)) {
            warn!("popup blocked, offering a manual trigger");
            ui.status("Waiting for you to open the authenticator window");
            let prompt = tokio::time::timeout(
                self.options.prompt_timeout,
                ui.prompt(PromptArgs {
                    title: "Popups are blocked".into(),
                    body: "Your browser blocked the authenticator window. Open it to continue."
                        .into(),
                    action: "Open authenticator".into(),
                }),
            );
            tokio::pin!(prompt);

            opened = tokio::select! {
                result = &mut receive => return map_receive(result),
                prompted = &mut prompt => match prompted {
                    Ok(Ok(_)) => {
                        self.surface
                            .open(url, &self.options.window_name, self.options.window_dimensions)
                            .await
                    }
                    Ok(Err(UiError::Dismissed)) | Err(_) => {
                        receive.abort();
                        return Err(HandshakeError::PopupBlocked);
                    }
                    Ok(Err(e)) => {
                        receive.abort();
                        return Err(HandshakeError::Ui(e));
                    }
                },
                _ = &mut deadline => {
                    receive.abort();
                    return Err(HandshakeError::Timeout);
                }
            };
        }

        let popup = match opened {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                receive.abort();
                return Err(HandshakeError::PopupBlocked);
            }
            Err(e) => {
                receive.abort();
                return Err(HandshakeError::Popup(e));
            }
        };

        let watcher = ClosedWatcher::spawn(
            Arc::clone(&popup),
            self.options.close_poll_interval,
            closed_tx,
        );

        ui.status("Waiting for the authenticator");
        let outcome = tokio::select! {
            result = &mut receive => map_receive(result),
            _ = closed_rx.recv() => Err(HandshakeError::UserCancelled),
            _ = &mut deadline => Err(HandshakeError::Timeout),
        };

        // Teardown before returning: stop the closed poll, close the
        // window, abort the receive task. Nothing settles twice.
        watcher.stop();
        popup.close();
        receive.abort();

        outcome
    }

    // ========================================================================
    // URLs
    // ========================================================================

    fn fresh_descriptor(&self) -> Result<CallbackDescriptor, HandshakeError> {
        let channel = ChannelId::fresh()?;
        Ok(match &self.options.callback {
            CallbackMode::Relay { service } => CallbackDescriptor::Relay {
                service: service.clone(),
                channel,
            },
            CallbackMode::Direct => CallbackDescriptor::WindowMessage {
                origin: self.options.authenticator.origin().ascii_serialization(),
                channel,
            },
        })
    }

    fn page_url(&self, page: &str) -> Result<Url, HandshakeError> {
        let mut url = self.options.authenticator.clone();
        url.path_segments_mut()
            .map_err(|_| HandshakeError::Usage("authenticator URL cannot be a base".into()))?
            .pop_if_empty()
            .push(page);
        Ok(url)
    }

    fn login_url(
        &self,
        request: &EncodedRequest,
        chain: &ChainId,
        request_key: &PublicKey,
        descriptor: &CallbackDescriptor,
    ) -> Result<Url, HandshakeError> {
        let mut url = self.page_url("login")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("esr", request.as_str())
                .append_pair("chain", &chain.to_string())
                .append_pair("requestKey", &request_key.to_string())
                .append_pair("appName", &self.options.app_name);
            if let CallbackDescriptor::Relay { channel, .. } = descriptor {
                query.append_pair("channel", channel.as_str());
            }
        }
        Ok(url)
    }

    fn sign_url(
        &self,
        sealed: &[u8],
        nonce: u64,
        chain_name: &str,
        signer: &PermissionLevel,
        request_key: &PublicKey,
        descriptor: &CallbackDescriptor,
    ) -> Result<Url, HandshakeError> {
        let mut url = self.page_url("sign")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("sealed", &hex::encode(sealed))
                .append_pair("nonce", &nonce.to_string())
                .append_pair("chain", chain_name)
                .append_pair("accountName", &signer.actor)
                .append_pair("permissionName", &signer.permission)
                .append_pair("appName", &self.options.app_name)
                .append_pair("requestKey", &request_key.to_string());
            if let CallbackDescriptor::Relay { channel, .. } = descriptor {
                query.append_pair("channel", channel.as_str());
            }
        }
        Ok(url)
    }
}

fn fresh_nonce() -> Result<u64, HandshakeError> {
    let mut bytes = [0u8; 8];
    getrandom(&mut bytes).map_err(|_| HandshakeError::Rng)?;
    Ok(u64::from_le_bytes(bytes))
}

fn map_receive(
    result: Result<Result<Bytes, ChannelError>, tokio::task::JoinError>,
) -> Result<Bytes, HandshakeError> {
    match result {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(ChannelError::Timeout)) => Err(HandshakeError::Timeout),
        Ok(Err(e)) => Err(HandshakeError::Channel(e)),
        Err(_) => Err(HandshakeError::Channel(ChannelError::Closed)),
    }
}
