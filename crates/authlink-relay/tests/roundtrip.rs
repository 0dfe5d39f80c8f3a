//! End-to-end tests: the relay service behind the client crate's
//! `RelayChannel`, over real HTTP on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use authlink_core::channel::ChannelError;
use authlink_core::relay::RelayChannel;
use authlink_core::{CallbackDescriptor, ChannelId, ResponseChannel};
use authlink_relay::config::ServerConfig;
use authlink_relay::RelayServer;
use bytes::Bytes;
use url::Url;

async fn start_relay_with(config: ServerConfig) -> (Arc<RelayServer>, Url) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = Arc::new(RelayServer::new(config).expect("relay server"));
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = serving.serve(listener).await {
            eprintln!("relay stopped: {}", e);
        }
    });

    let service = Url::parse(&format!("http://{}", addr)).expect("service url");
    (server, service)
}

async fn start_relay() -> (Arc<RelayServer>, Url) {
    start_relay_with(ServerConfig::default()).await
}

fn fresh_descriptor(service: &Url) -> CallbackDescriptor {
    CallbackDescriptor::Relay {
        service: service.clone(),
        channel: ChannelId::fresh().expect("channel id"),
    }
}

#[tokio::test]
async fn roundtrip_post_then_poll_delivers() {
    let (_server, service) = start_relay().await;
    let client = RelayChannel::new().expect("relay client");
    let descriptor = fresh_descriptor(&service);

    client
        .send(&descriptor, Bytes::from_static(b"callback payload"))
        .await
        .expect("post");

    let received = client
        .receive(&descriptor, Duration::from_secs(5))
        .await
        .expect("poll");
    assert_eq!(&received[..], b"callback payload");
}

#[tokio::test]
async fn roundtrip_longpoll_wakes_on_post() {
    let (_server, service) = start_relay().await;
    let client = RelayChannel::new().expect("relay client");
    let descriptor = fresh_descriptor(&service);

    let poller = {
        let client = client.clone();
        let descriptor = descriptor.clone();
        tokio::spawn(async move { client.receive(&descriptor, Duration::from_secs(10)).await })
    };

    // Let the poller park on the long poll before the payload lands.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let posted_at = std::time::Instant::now();
    client
        .send(&descriptor, Bytes::from_static(b"late arrival"))
        .await
        .expect("post");

    let received = poller.await.expect("join").expect("poll");
    assert_eq!(&received[..], b"late arrival");
    assert!(
        posted_at.elapsed() < Duration::from_secs(2),
        "long poll should wake on post, not sleep out its window"
    );
}

#[tokio::test]
async fn roundtrip_receive_timeout_leaves_channel_usable() {
    let (_server, service) = start_relay().await;
    let client = RelayChannel::new().expect("relay client");
    let descriptor = fresh_descriptor(&service);

    let timed_out = client
        .receive(&descriptor, Duration::from_millis(300))
        .await;
    assert!(matches!(timed_out, Err(ChannelError::Timeout)));

    client
        .send(&descriptor, Bytes::from_static(b"second chance"))
        .await
        .expect("post");

    let received = client
        .receive(&descriptor, Duration::from_secs(5))
        .await
        .expect("poll after timeout");
    assert_eq!(&received[..], b"second chance");
}

#[tokio::test]
async fn roundtrip_message_consumed_after_pickup() {
    let (_server, service) = start_relay().await;
    let client = RelayChannel::new().expect("relay client");
    let descriptor = fresh_descriptor(&service);

    client
        .send(&descriptor, Bytes::from_static(b"once"))
        .await
        .expect("post");
    client
        .receive(&descriptor, Duration::from_secs(5))
        .await
        .expect("first pickup");

    let second = client
        .receive(&descriptor, Duration::from_millis(300))
        .await;
    assert!(matches!(second, Err(ChannelError::Timeout)));
}

#[tokio::test]
async fn roundtrip_channels_are_isolated() {
    let (_server, service) = start_relay().await;
    let client = RelayChannel::new().expect("relay client");
    let first = fresh_descriptor(&service);
    let second = fresh_descriptor(&service);

    client
        .send(&first, Bytes::from_static(b"for the first"))
        .await
        .expect("post");

    let cross = client.receive(&second, Duration::from_millis(300)).await;
    assert!(matches!(cross, Err(ChannelError::Timeout)));

    let received = client
        .receive(&first, Duration::from_secs(5))
        .await
        .expect("poll");
    assert_eq!(&received[..], b"for the first");
}

#[tokio::test]
async fn roundtrip_rejects_malformed_channel_ids() {
    let (_server, service) = start_relay().await;
    let client = RelayChannel::new().expect("relay client");

    // Not hex, and hex that is not 32 bytes.
    for bad in ["not-hex", "abcd"] {
        let descriptor = CallbackDescriptor::Relay {
            service: service.clone(),
            channel: ChannelId::from_string(bad),
        };
        let result = client.send(&descriptor, Bytes::from_static(b"x")).await;
        assert!(
            matches!(result, Err(ChannelError::BadResponse(_))),
            "id {:?} should be rejected",
            bad
        );
    }
}

#[tokio::test]
async fn roundtrip_queue_cap_surfaces_as_bad_response() {
    let config = ServerConfig {
        max_queue_length: 2,
        ..ServerConfig::default()
    };
    let (_server, service) = start_relay_with(config).await;
    let client = RelayChannel::new().expect("relay client");
    let descriptor = fresh_descriptor(&service);

    for _ in 0..2 {
        client
            .send(&descriptor, Bytes::from_static(b"fits"))
            .await
            .expect("post within cap");
    }

    let overflow = client.send(&descriptor, Bytes::from_static(b"fits")).await;
    match overflow {
        Err(ChannelError::BadResponse(message)) => {
            assert!(message.contains("507"), "unexpected message: {}", message);
        }
        other => panic!("expected queue-full rejection, got {:?}", other),
    }
}
