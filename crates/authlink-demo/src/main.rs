use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use authlink_core::harness::{JsonCodec, OpenedWindow, ScriptedSurface};
use authlink_core::relay::RelayChannel;
use authlink_core::ui::{PromptArgs, PromptResponse, UiError, UserInterface};
use authlink_core::{
    CallbackDescriptor, CallbackMode, ChainDefinition, ChainId, ChannelId, LinkOptions,
    LoginContext, ResolvedTransaction, ResponseChannel, TransactContext, WebAuthenticatorLink,
};
use authlink_crypto::{unseal, PrivateKey, PublicKey};
use authlink_relay::config::ServerConfig;
use authlink_relay::RelayServer;

const JUNGLE4_CHAIN_ID: &str = "73e4385a2708e6d7048834fbc1079f2fabb17b3c125b146af438971e90716c4d";
const DEMO_ACCOUNT: &str = "demoaccount1";
const DEMO_PERMISSION: &str = "active";
const DEMO_SIGNATURE: &str = "SIG_K1_KBub1qmdiPpWA2XKKEZEG3EfKJBf38GETHzbd2tioh9zi7DiVB";

/// Prints status lines and accepts every prompt, standing in for an
/// application's real UI.
struct PrintlnUi;

#[async_trait::async_trait]
impl UserInterface for PrintlnUi {
    fn status(&self, text: &str) {
        println!("STATUS {text}");
    }

    async fn prompt(&self, args: PromptArgs) -> Result<PromptResponse, UiError> {
        println!("PROMPT {}: {}", args.title, args.body);
        Ok(PromptResponse)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Point at an external relay, or run one in-process on a loopback
    // port.
    let (local_relay, service) = match args.get(1) {
        Some(raw) => (None, Url::parse(raw).context("relay URL")?),
        None => {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            let server = Arc::new(RelayServer::new(ServerConfig::default())?);
            let serving = Arc::clone(&server);
            tokio::spawn(async move {
                if let Err(e) = serving.serve(listener).await {
                    eprintln!("relay stopped: {e}");
                }
            });
            (Some(server), Url::parse(&format!("http://{addr}"))?)
        }
    };
    println!("RELAY_URL={service}");

    let chain = ChainDefinition::new(ChainId::from_hex(JUNGLE4_CHAIN_ID)?, "jungle4");

    // The scripted surface stands in for window.open; every URL it
    // "opens" goes to the authenticator task instead of a browser.
    let (surface, windows) = ScriptedSurface::scripted(Vec::new());
    let authenticator = tokio::spawn({
        let service = service.clone();
        async move {
            if let Err(e) = run_authenticator(windows, service).await {
                eprintln!("authenticator stopped: {e}");
            }
        }
    });

    let options = LinkOptions::new(Url::parse("https://authenticator.demo")?, "authlink-demo")
        .with_callback(CallbackMode::Relay {
            service: service.clone(),
        });
    let link = WebAuthenticatorLink::new(
        options,
        Arc::new(RelayChannel::new()?),
        Arc::new(surface),
    );

    let ui: Arc<PrintlnUi> = Arc::new(PrintlnUi);

    // Login
    let login = link
        .login(LoginContext {
            chain: chain.clone(),
            permission: None,
            ui: Arc::clone(&ui) as Arc<dyn UserInterface>,
            codec: Arc::new(JsonCodec),
        })
        .await?;
    println!("LOGIN_PERMISSION={}", login.permission);
    println!("LOGIN_CHAIN={}", login.chain);
    println!("LOGIN_COUNTERSIGNED={}", login.identity_proof.is_some());

    // Sign a token transfer with the session key material the login
    // left behind.
    let transaction = ResolvedTransaction {
        signer: login.permission.clone(),
        transaction: serde_json::json!({
            "expiration": "2026-08-22T00:00:00",
            "actions": [{
                "account": "eosio.token",
                "name": "transfer",
                "authorization": [{
                    "actor": DEMO_ACCOUNT,
                    "permission": DEMO_PERMISSION,
                }],
                "data": {
                    "from": DEMO_ACCOUNT,
                    "to": "recipient11",
                    "quantity": "0.0001 EOS",
                    "memo": "authlink demo",
                },
            }],
        }),
    };
    let signed = link
        .sign(
            &transaction,
            TransactContext {
                chain: chain.clone(),
                ui: Arc::clone(&ui) as Arc<dyn UserInterface>,
                codec: Arc::new(JsonCodec),
            },
        )
        .await?;
    for (i, signature) in signed.signatures.iter().enumerate() {
        println!("SIGNATURE_{i}={signature}");
    }

    authenticator.abort();
    if let Some(server) = local_relay {
        server.shutdown();
    }
    Ok(())
}

/// Plays the authenticator pages: answers every opened window with a
/// login or signing callback, delivered over the relay like the real
/// pages would deliver it.
async fn run_authenticator(
    mut windows: mpsc::UnboundedReceiver<OpenedWindow>,
    service: Url,
) -> anyhow::Result<()> {
    // Long-lived authenticator key. Its public half travels back in the
    // login callback and seals every later signing request.
    let link_key = PrivateKey::generate();
    let client = RelayChannel::new()?;

    while let Some(window) = windows.recv().await {
        let channel = window
            .param("channel")
            .context("window URL carries no channel parameter")?;
        let descriptor = CallbackDescriptor::Relay {
            service: service.clone(),
            channel: ChannelId::from_string(channel),
        };

        let payload = if window.url.path().ends_with("/login") {
            println!(
                "AUTHENTICATOR_LOGIN_REQUEST={}",
                window.param("esr").unwrap_or_default()
            );
            serde_json::json!({
                "cid": JUNGLE4_CHAIN_ID,
                "sa": DEMO_ACCOUNT,
                "sp": DEMO_PERMISSION,
                "link_key": link_key.public_key().to_string(),
                "sig": DEMO_SIGNATURE,
            })
        } else {
            let sealed =
                hex::decode(window.param("sealed").context("missing sealed parameter")?)?;
            let nonce: u64 = window
                .param("nonce")
                .context("missing nonce parameter")?
                .parse()?;
            let request_key: PublicKey = window
                .param("requestKey")
                .context("missing requestKey parameter")?
                .parse()?;

            let request = unseal(&sealed, &link_key, &request_key, nonce)?;
            println!(
                "AUTHENTICATOR_SIGNING_REQUEST={}",
                String::from_utf8_lossy(&request)
            );
            serde_json::json!({
                "cid": JUNGLE4_CHAIN_ID,
                "sa": DEMO_ACCOUNT,
                "sp": DEMO_PERMISSION,
                "sig": DEMO_SIGNATURE,
            })
        };

        client
            .send(&descriptor, Bytes::from(payload.to_string()))
            .await?;
    }

    Ok(())
}
