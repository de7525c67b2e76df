//! Integration tests for the native WebSocket transport.
//!
//! Each test binds a local listener, accepts one socket server-side with
//! `tokio_tungstenite::accept_async`, and wraps both ends in `WsTransport`.
//!
//! Run with:
//! ```bash
//! cargo test -p lightcone-wallet-bridge --features ws-native --test ws_native_integration
//! ```

#![cfg(feature = "ws-native")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::timeout;

use lightcone_wallet_bridge::error::PasskeyError;
use lightcone_wallet_bridge::prelude::*;
use lightcone_wallet_bridge::rpc::keys::KEY_PUBLIC_KEY;

const HOST: &str = "https://app.lightcone.xyz";
const WALLET: &str = "https://wallet.lightcone.xyz";
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect a client transport to a freshly accepted server transport.
async fn socket_pair() -> (WsTransport, WsTransport) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let accept = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
        WsTransport::from_stream(ws, HOST)
    });

    let client = WsTransport::connect(WsConfig {
        url: format!("ws://{}", addr),
        peer_origin: WALLET.into(),
    })
    .await
    .expect("connect should succeed");
    let server = accept.await.expect("accept task");
    (client, server)
}

fn trusting(origin: &str, self_origin: &str) -> ChannelOptions {
    ChannelOptions {
        trusted_origins: Some(TrustedOrigins::parse(Some(self_origin.into()), origin)),
        ..Default::default()
    }
}

struct NoPasskeys;

impl PasskeyProvider for NoPasskeys {
    async fn create(&self, _name: &str) -> Result<PasskeyWallet, PasskeyError> {
        Err(PasskeyError::Cancelled)
    }

    async fn authenticate(&self, _credential_id: &str) -> Result<PasskeyWallet, PasskeyError> {
        Err(PasskeyError::NoCredential)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_async_over_socket() {
    let (client, server) = socket_pair().await;
    assert!(client.is_connected());
    assert_eq!(server.peer_origin(), HOST);

    let host = Channel::new(Arc::new(client), trusting(WALLET, HOST));
    let wallet = Arc::new(Channel::new(Arc::new(server), trusting(HOST, WALLET)));

    let responder = Arc::clone(&wallet);
    wallet
        .on(
            Topic::Internal,
            move |inbound| {
                if let Some(id) = inbound.envelope.id.as_deref() {
                    let _ = responder.reply(id, Topic::Success, &json!({"pong": true}), None);
                }
            },
            None,
        )
        .unwrap();

    let reply: Reply<serde_json::Value> = timeout(
        TEST_TIMEOUT,
        host.send_async(Topic::Internal, &json!({"ping": 1}), SendOptions::reply_on(Topic::Success)),
    )
    .await
    .expect("timed out");
    assert_eq!(reply, Reply::Ok(json!({"pong": true})));
}

#[tokio::test]
async fn test_post_to_wrong_origin_is_dropped() {
    let (client, _server) = socket_pair().await;
    let host = Channel::new(Arc::new(client), ChannelOptions::default());

    let reply: Reply<serde_json::Value> = host
        .send_async(
            Topic::Internal,
            &json!({}),
            SendOptions::reply_on(Topic::Success)
                .target_origin("https://someone-else.example")
                .timeout(Duration::from_millis(100)),
        )
        .await;
    assert_eq!(reply, Reply::TimedOut);
}

#[tokio::test]
async fn test_connect_auto_resolves_over_socket() {
    let (client, server) = socket_pair().await;

    let config = BridgeConfig::builder()
        .trusted_origins(TrustedOrigins::parse(Some(WALLET.into()), HOST))
        .build();
    let store = MemoryStore::new();
    store.set(KEY_PUBLIC_KEY, "KnownKey111");
    let wallet = Arc::new(Channel::new(Arc::new(server), ChannelOptions::from_config(&config)));
    let lifecycle = RequestLifecycle::new(wallet, store, NoPasskeys, &config);
    let (actor, handle) = LifecycleActor::new(lifecycle).unwrap();

    let host = Channel::new(Arc::new(client), trusting(WALLET, HOST));

    let driver = async {
        let reply: Reply<RpcResponse> = host
            .send_async(
                Topic::RpcRequests,
                &json!([{"id": 1, "method": "connect"}]),
                SendOptions::reply_on(Topic::RpcResponse),
            )
            .await;
        let response = reply.ok().expect("connect response");
        assert_eq!(
            response.result(),
            Some(&json!({"publicKey": "KnownKey111", "connected": true}))
        );
        drop(handle);
    };

    timeout(TEST_TIMEOUT, async { tokio::join!(actor.run(), driver) })
        .await
        .expect("timed out");
}

#[tokio::test]
async fn test_disconnect_stops_posting() {
    let (mut client, _server) = socket_pair().await;
    client.disconnect().await.unwrap();
    assert!(!client.is_connected());

    let err = client.post(&Envelope::new(Topic::Close), "*").unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));
}
