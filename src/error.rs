//! Unified bridge error types.
//!
//! These are local failures. Protocol-level failures travel to the requester as
//! [`RpcErrorObject`](crate::rpc::RpcErrorObject) values inside an
//! [`RpcResponse`](crate::rpc::RpcResponse) and never surface here.

use thiserror::Error;

/// Top-level bridge error.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Bridge destroyed")]
    Destroyed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Transport-layer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Channel destroyed")]
    Destroyed,

    #[error("Connection closed: code={code:?} reason={reason}")]
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// Request lifecycle errors surfaced to the UI layer, never to the requester.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("No current request")]
    NoCurrentRequest,

    #[error("Missing key material: {0}")]
    MissingKeyMaterial(String),

    #[error("Passkey error: {0}")]
    Passkey(#[from] PasskeyError),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Result encoding failed: {0}")]
    Encode(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidState { from: String, to: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors from the external passkey / key-derivation module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasskeyError {
    /// No credential exists for the given id. Triggers the creation fallback.
    #[error("No credential found")]
    NoCredential,

    #[error("Passkey ceremony cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}
