//! Transport layer — envelopes, topics, listener registry, channels.
//!
//! The actual window/socket binding is pluggable behind [`Transport`]:
//! - always → in-process pair (memory.rs), used by tests and same-process hosts
//! - `ws-native` feature → `tokio-tungstenite` (native.rs)
//! - `wasm` feature on wasm32 → `web-sys` `postMessage` (wasm.rs)
//!
//! Backends only move envelopes. Topic, correlation-id, and trusted-origin
//! filtering happen in [`Channel`], identically for every backend.

pub mod channel;
pub mod listeners;
pub mod memory;

#[cfg(feature = "ws-native")]
pub mod native;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub mod wasm;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

pub use channel::{Channel, ChannelOptions, PendingReply, RejectReason, Reply, SendOptions};
pub use listeners::{Handler, Listeners, Subscription};
pub use memory::MemoryTransport;

// ─── Topic ───────────────────────────────────────────────────────────────────

/// Purpose tag of an envelope. Closed set; unknown topics fail to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "close")]
    Close,
    #[serde(rename = "rpc-request")]
    RpcRequest,
    /// Always carries an array; only the head is acted upon.
    #[serde(rename = "rpc-requests")]
    RpcRequests,
    #[serde(rename = "rpc-response")]
    RpcResponse,
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "__internal")]
    Internal,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Close => "close",
            Self::RpcRequest => "rpc-request",
            Self::RpcRequests => "rpc-requests",
            Self::RpcResponse => "rpc-response",
            Self::Success => "success",
            Self::Internal => "__internal",
        }
    }

    /// Fire-and-forget topics are posted without a correlation id.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(self, Self::Ready | Self::Close)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// Wire message: `{ id?, topic, payload? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub topic: Topic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Envelope {
    pub fn new(topic: Topic) -> Self {
        Self {
            id: None,
            topic,
            payload: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decode the payload into `T`. A missing payload decodes as JSON `null`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone().unwrap_or(serde_json::Value::Null))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// An envelope as received, tagged with the sender's origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub origin: String,
    pub envelope: Envelope,
}

/// Fresh random correlation id.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Transport backend ───────────────────────────────────────────────────────

/// `Send + Sync` on native targets; no bound on wasm, where JS handles are `!Send`.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSendSync: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> MaybeSendSync for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSendSync {}
#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> MaybeSendSync for T {}

/// A binding to exactly one peer.
pub trait Transport: MaybeSendSync {
    /// Post an envelope to the peer, restricted to `target_origin` (`"*"` for any).
    ///
    /// Never waits for a reply. A post whose target origin does not match the
    /// peer is dropped silently, as `postMessage` does.
    fn post(&self, envelope: &Envelope, target_origin: &str) -> Result<(), TransportError>;

    /// Register a handler for every inbound envelope, unfiltered.
    fn subscribe(&self, handler: Handler) -> Subscription;
}

/// Whether a post restricted to `target_origin` may reach a peer at `peer_origin`.
pub(crate) fn target_matches(target_origin: &str, peer_origin: &str) -> bool {
    target_origin == "*" || target_origin == peer_origin
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_wire_names() {
        let cases = [
            (Topic::Ready, "\"ready\""),
            (Topic::Close, "\"close\""),
            (Topic::RpcRequest, "\"rpc-request\""),
            (Topic::RpcRequests, "\"rpc-requests\""),
            (Topic::RpcResponse, "\"rpc-response\""),
            (Topic::Success, "\"success\""),
            (Topic::Internal, "\"__internal\""),
        ];
        for (topic, wire) in cases {
            assert_eq!(serde_json::to_string(&topic).unwrap(), wire);
            assert_eq!(format!("\"{}\"", topic), wire);
        }
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let result = Envelope::from_json(r#"{"id":"1","topic":"ping"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_omits_absent_fields() {
        let env = Envelope::new(Topic::Close);
        assert_eq!(env.to_json().unwrap(), r#"{"topic":"close"}"#);
    }

    #[test]
    fn test_envelope_parses_full_shape() {
        let env = Envelope::from_json(
            r#"{"id":"abc","topic":"rpc-requests","payload":[{"id":1,"method":"connect"}]}"#,
        )
        .unwrap();
        assert_eq!(env.id.as_deref(), Some("abc"));
        assert_eq!(env.topic, Topic::RpcRequests);
        assert_eq!(env.payload, Some(json!([{"id": 1, "method": "connect"}])));
    }

    #[test]
    fn test_payload_as_missing_is_null() {
        let env = Envelope::new(Topic::Ready);
        let v: Option<u32> = env.payload_as().unwrap();
        assert!(v.is_none());
    }

    #[test]
    fn test_fire_and_forget() {
        assert!(Topic::Ready.is_fire_and_forget());
        assert!(Topic::Close.is_fire_and_forget());
        assert!(!Topic::RpcResponse.is_fire_and_forget());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_target_matches() {
        assert!(target_matches("*", "https://a.com"));
        assert!(target_matches("https://a.com", "https://a.com"));
        assert!(!target_matches("https://b.com", "https://a.com"));
    }

    // The browser backend only exists on wasm32; `--features wasm` on a native
    // target still builds the rest of the crate.
    #[cfg(all(feature = "wasm", not(target_arch = "wasm32")))]
    #[test]
    fn test_wasm_feature_on_native_target() {
        fn assert_backend<T: Transport + Send + Sync>() {}
        assert_backend::<MemoryTransport>();
    }
}
