//! Integration tests for the authenticator handshake.
//!
//! These tests verify the complete end-to-end behavior including:
//! - Login validation, identity proof, and session key storage
//! - Sign sealing, signature collection, and validation
//! - The response race: user cancellation, deadline, popup blocking
//!   with manual-trigger fallback, and stale-channel isolation

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use url::Url;

use authlink_core::channel::{CallbackDescriptor, ChannelId, ResponseChannel};
use authlink_core::direct::{MessageBus, WindowChannel, WindowMessage};
use authlink_core::errors::HandshakeError;
use authlink_core::handshake::{LinkOptions, LoginContext, WebAuthenticatorLink};
use authlink_core::harness::{
    login_context, login_payload, sign_payload, test_chain, transact_context, JsonCodec, NullUi,
    OpenOutcome, ScriptedSurface, TestRig, TEST_CHAIN_ID, TEST_SIGNATURE,
};
use authlink_core::popup::PopupHandle;
use authlink_core::types::{PermissionLevel, ResolvedTransaction};
use authlink_crypto::{unseal, PrivateKey, PublicKey};

fn test_transaction() -> ResolvedTransaction {
    ResolvedTransaction {
        signer: PermissionLevel::new("wharfkit1131", "test"),
        transaction: serde_json::json!({
            "actions": [{"account": "eosio.token", "name": "transfer"}]
        }),
    }
}

/// Test: Login returns the identity proof and stores session keys
#[tokio::test]
async fn integration_login_returns_identity_proof() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let (login, window) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&authenticator_key.public_key())),
    );

    let login = login.expect("login should succeed");
    let proof = login.identity_proof.expect("identity proof");
    assert_eq!(proof.signature, TEST_SIGNATURE);

    // The proof covers the request exactly as it went out in the URL.
    assert_eq!(
        window.param("esr").as_deref(),
        Some(proof.signed_request.as_str())
    );
    assert_eq!(window.param("appName").as_deref(), Some("testapp"));
    assert_eq!(window.param("chain").as_deref(), Some(TEST_CHAIN_ID));

    // The URL carried the public half of the freshly minted key.
    let request_key: PublicKey = window
        .param("requestKey")
        .expect("requestKey param")
        .parse()
        .expect("valid public key");
    let session = link.session_keys().await.expect("session keys stored");
    assert_eq!(
        request_key.to_string(),
        session.request_key.public_key().to_string()
    );
    assert_eq!(
        session.link_key.to_string(),
        authenticator_key.public_key().to_string()
    );
}

/// Test: Login response without a chain id fails validation
#[tokio::test]
async fn integration_login_missing_chain_id_fails() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let mut payload = login_payload(&authenticator_key.public_key());
    payload.as_object_mut().expect("object").remove("cid");

    let (login, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(payload),
    );

    let err = login.expect_err("login must fail");
    assert!(err.to_string().starts_with("Login failed:"));
    assert!(err.to_string().contains("chain ID"));
    assert!(link.session_keys().await.is_none());
}

/// Test: Login response with a malformed link key fails validation
#[tokio::test]
async fn integration_login_unusable_link_key_fails() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let mut payload = login_payload(&authenticator_key.public_key());
    payload["link_key"] = serde_json::json!("not-a-key");

    let (login, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(payload),
    );

    let err = login.expect_err("login must fail");
    assert!(err.to_string().contains("link key"));
    assert!(link.session_keys().await.is_none());
}

/// Test: Sign seals the request so only the authenticator can open it
#[tokio::test]
async fn integration_sign_seals_request_for_the_authenticator() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let (login, login_window) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&authenticator_key.public_key())),
    );
    login.expect("login should succeed");

    let resolved = test_transaction();
    let sign = link.sign(&resolved, transact_context(&ui));
    let drive = async {
        let window = authenticator.next_window().await;

        assert_eq!(window.param("chain").as_deref(), Some("jungle4"));
        assert_eq!(window.param("accountName").as_deref(), Some("wharfkit1131"));
        assert_eq!(window.param("permissionName").as_deref(), Some("test"));

        // A fresh channel id for the second exchange.
        assert_ne!(window.param("channel"), login_window.param("channel"));

        // Unseal with the authenticator key and the request key from
        // the URL and recover the signing request.
        let sealed = hex::decode(window.param("sealed").expect("sealed param")).expect("hex");
        let nonce: u64 = window
            .param("nonce")
            .expect("nonce param")
            .parse()
            .expect("u64 nonce");
        let request_key: PublicKey = window
            .param("requestKey")
            .expect("requestKey param")
            .parse()
            .expect("valid public key");
        let opened =
            unseal(&sealed, &authenticator_key, &request_key, nonce).expect("unseal");
        let request: serde_json::Value = serde_json::from_slice(&opened).expect("json request");
        assert_eq!(request["broadcast"], serde_json::json!(false));
        assert_eq!(
            request["tx"]["actions"][0]["name"],
            serde_json::json!("transfer")
        );

        authenticator.answer(&window, sign_payload(TEST_SIGNATURE)).await;
    };

    let (sign, _) = tokio::join!(sign, drive);
    let sign = sign.expect("sign should succeed");
    assert_eq!(sign.signatures, vec![TEST_SIGNATURE.to_string()]);
}

/// Test: Numbered signature slots are collected in order, bad shapes dropped
#[tokio::test]
async fn integration_sign_collects_numbered_signatures() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let (login, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&authenticator_key.public_key())),
    );
    login.expect("login should succeed");

    let mut payload = sign_payload(TEST_SIGNATURE);
    payload["sig0"] = serde_json::json!("SIG_K1_second");
    payload["sig1"] = serde_json::json!("not a signature");

    let resolved = test_transaction();
    let (sign, _) = tokio::join!(
        link.sign(&resolved, transact_context(&ui)),
        authenticator.answer_next_window(payload),
    );

    let sign = sign.expect("sign should succeed");
    assert_eq!(
        sign.signatures,
        vec![TEST_SIGNATURE.to_string(), "SIG_K1_second".to_string()]
    );
}

/// Test: A response with no usable signature fails the sign flow
#[tokio::test]
async fn integration_sign_without_signatures_fails() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let (login, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&authenticator_key.public_key())),
    );
    login.expect("login should succeed");

    let mut payload = sign_payload(TEST_SIGNATURE);
    payload.as_object_mut().expect("object").remove("sig");

    let resolved = test_transaction();
    let (sign, _) = tokio::join!(
        link.sign(&resolved, transact_context(&ui)),
        authenticator.answer_next_window(payload),
    );

    let err = sign.expect_err("sign must fail");
    assert!(err.to_string().starts_with("Signing failed:"));
    assert!(err.to_string().contains("no signatures returned"));
}

/// Test: A response for a different chain fails the sign flow
#[tokio::test]
async fn integration_sign_wrong_chain_fails() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let authenticator_key = PrivateKey::generate();
    let (login, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&authenticator_key.public_key())),
    );
    login.expect("login should succeed");

    let mut payload = sign_payload(TEST_SIGNATURE);
    payload["cid"] =
        serde_json::json!("aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906");

    let resolved = test_transaction();
    let (sign, _) = tokio::join!(
        link.sign(&resolved, transact_context(&ui)),
        authenticator.answer_next_window(payload),
    );

    let err = sign.expect_err("sign must fail");
    assert!(err.to_string().contains("wrong chain"));
}

/// Test: The user closing the window settles the flow as cancelled
#[tokio::test]
async fn integration_user_closing_popup_cancels() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let started = Instant::now();
    let (login, window) = tokio::join!(link.login(login_context(&ui)), async {
        let window = authenticator.next_window().await;
        window.handle.close_by_user();
        window
    });

    let err = login.expect_err("login must fail");
    assert!(matches!(err.cause(), HandshakeError::UserCancelled));
    assert_eq!(err.to_string(), "Login failed: authentication cancelled");
    assert!(window.handle.is_closed());
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancellation must settle well before the deadline"
    );
}

/// Test: No response within the deadline times the flow out and closes
/// the window
#[tokio::test]
async fn integration_response_timeout_closes_window() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::with_response_timeout(Vec::new(), Duration::from_millis(250));

    let (login, window) =
        tokio::join!(link.login(login_context(&ui)), authenticator.next_window());

    let err = login.expect_err("login must time out");
    assert!(matches!(err.cause(), HandshakeError::Timeout));
    assert!(window.handle.is_closed());
}

/// Test: A blocked popup recovers through the manual trigger
#[tokio::test]
async fn integration_popup_blocked_manual_trigger_recovers() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(vec![OpenOutcome::Blocked, OpenOutcome::Window]);

    let authenticator_key = PrivateKey::generate();
    let (login, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&authenticator_key.public_key())),
    );

    login.expect("login should recover after the manual trigger");
    assert_eq!(ui.prompt_count(), 1);
}

/// Test: Declining the manual trigger surfaces the popup-blocked error
#[tokio::test]
async fn integration_popup_blocked_prompt_declined_fails() {
    let TestRig {
        link,
        ui: _ui,
        mut authenticator,
    } = TestRig::new(vec![OpenOutcome::Blocked]);

    let context = LoginContext {
        chain: test_chain(),
        permission: None,
        ui: Arc::new(NullUi),
        codec: Arc::new(JsonCodec),
    };
    let err = link.login(context).await.expect_err("login must fail");
    assert!(matches!(err.cause(), HandshakeError::PopupBlocked));
    assert_eq!(
        err.to_string(),
        "Login failed: popup blocked - please enable popups for this site"
    );
    assert!(authenticator.windows.try_recv().is_err());
}

/// Test: A second block in the same exchange fails without re-prompting
#[tokio::test]
async fn integration_popup_blocked_twice_fails_without_second_prompt() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(vec![OpenOutcome::Blocked, OpenOutcome::Blocked]);

    let err = link
        .login(login_context(&ui))
        .await
        .expect_err("login must fail");
    assert!(matches!(err.cause(), HandshakeError::PopupBlocked));
    assert_eq!(ui.prompt_count(), 1);
    assert!(authenticator.windows.try_recv().is_err());
}

/// Test: A delivery on a previous exchange's channel never settles a
/// new exchange
#[tokio::test]
async fn integration_stale_channel_delivery_is_ignored() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let key1 = PrivateKey::generate();
    let (first, first_window) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&key1.public_key())),
    );
    first.expect("first login should succeed");
    let stale_channel = first_window.param("channel").expect("channel param");

    let key2 = PrivateKey::generate();
    let mut stale_payload = login_payload(&key1.public_key());
    stale_payload["sa"] = serde_json::json!("staleaccount");

    let login = link.login(login_context(&ui));
    let drive = async {
        let window = authenticator.next_window().await;
        assert_ne!(
            window.param("channel").expect("channel param"),
            stale_channel
        );

        // Deliver to the dead channel first; nothing may settle.
        let stale = CallbackDescriptor::Relay {
            service: authenticator.service.clone(),
            channel: ChannelId::from_string(stale_channel.clone()),
        };
        authenticator
            .channel
            .send(&stale, Bytes::from(stale_payload.to_string()))
            .await
            .expect("stale send");
        tokio::time::sleep(Duration::from_millis(100)).await;

        authenticator
            .answer(&window, login_payload(&key2.public_key()))
            .await;
    };

    let (second, _) = tokio::join!(login, drive);
    let second = second.expect("second login should succeed");
    assert_eq!(second.permission.actor, "wharfkit1131");
}

/// Test: Direct mode matches on origin and drops foreign messages
#[tokio::test]
async fn integration_direct_mode_drops_foreign_origin() {
    let bus = MessageBus::default();
    let channel = Arc::new(WindowChannel::new(bus.clone()));
    let (surface, mut windows) = ScriptedSurface::scripted(Vec::new());
    let options = LinkOptions::new(Url::parse("https://auth.test").expect("url"), "testapp")
        .with_response_timeout(Duration::from_secs(5))
        .with_close_poll_interval(Duration::from_millis(20));
    let link = WebAuthenticatorLink::new(options, channel, Arc::new(surface));

    let ui = Arc::new(authlink_core::harness::AutoTriggerUi::default());
    let authenticator_key = PrivateKey::generate();

    let login = link.login(login_context(&ui));
    let drive = async {
        let window = windows.recv().await.expect("window opened");
        // Direct mode carries no channel parameter in the URL.
        assert!(window.param("channel").is_none());

        let mut forged = login_payload(&authenticator_key.public_key());
        forged["sa"] = serde_json::json!("evilaccount");
        bus.publish(WindowMessage {
            origin: "https://evil.test".to_string(),
            channel: None,
            data: Bytes::from(forged.to_string()),
        });
        bus.publish(WindowMessage {
            origin: "https://auth.test".to_string(),
            channel: None,
            data: Bytes::from(login_payload(&authenticator_key.public_key()).to_string()),
        });
    };

    let (login, _) = tokio::join!(login, drive);
    let login = login.expect("login should succeed");
    assert_eq!(login.permission.actor, "wharfkit1131");
}

/// Test: A second login replaces the stored session keys
#[tokio::test]
async fn integration_second_login_overwrites_session_keys() {
    let TestRig {
        link,
        ui,
        mut authenticator,
    } = TestRig::new(Vec::new());

    let key1 = PrivateKey::generate();
    let (first, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&key1.public_key())),
    );
    first.expect("first login should succeed");
    let session1 = link.session_keys().await.expect("session keys");

    let key2 = PrivateKey::generate();
    let (second, _) = tokio::join!(
        link.login(login_context(&ui)),
        authenticator.answer_next_window(login_payload(&key2.public_key())),
    );
    second.expect("second login should succeed");
    let session2 = link.session_keys().await.expect("session keys");

    assert_ne!(
        session1.link_key.to_string(),
        session2.link_key.to_string()
    );
    assert_ne!(
        session1.request_key.public_key().to_string(),
        session2.request_key.public_key().to_string()
    );
}
