//! # Lightcone Wallet Bridge
//!
//! Cross-window messaging between an untrusted host page and an embedded
//! wallet surface (iframe or popup), with native and WASM backends.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core** — Shared newtypes, errors, configuration (always available, WASM-safe)
//! 2. **Transport** — Typed envelopes over interchangeable backends: in-process,
//!    `tokio-tungstenite` (native) / `web-sys` `postMessage` (WASM)
//! 3. **Bridge & Trust** — Ready-gated duplex bridge, trusted-origin policy
//! 4. **RPC** — Wire types, dialog state, per-request lifecycle, lifecycle actor
//! 5. **Classifier** — Heuristic transaction classification for approval screens
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lightcone_wallet_bridge::prelude::*;
//!
//! let config = BridgeConfig::from_env()?;
//! let channel = Arc::new(Channel::new(transport, ChannelOptions::from_config(&config)));
//! let lifecycle = RequestLifecycle::new(channel, store, passkeys, &config);
//! let (actor, handle) = LifecycleActor::new(lifecycle)?;
//!
//! handle.approve()?;
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Shared newtypes and amount helpers.
pub mod shared;

/// Unified bridge error types.
pub mod error;

/// Configuration, defaults and env loading.
pub mod config;

// ── Layer 2: Transport ───────────────────────────────────────────────────────

/// Envelopes, the `Transport` trait, `Channel`, and backends.
pub mod transport;

// ── Layer 3: Bridge & Trust ──────────────────────────────────────────────────

/// `Bridge` — from/to channel pair with a ready handshake.
pub mod bridge;

/// Trusted-origin policy and referrer reputation.
pub mod trust;

// ── Layer 4: RPC ─────────────────────────────────────────────────────────────

/// RPC wire types, dialog state and request lifecycle.
pub mod rpc;

// ── Layer 5: Classifier ──────────────────────────────────────────────────────

/// Transaction classification for approval presentation.
pub mod classify;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared newtypes
    pub use crate::shared::{PubkeyStr, RequestId};

    // Errors
    pub use crate::error::{BridgeError, LifecycleError, PasskeyError, TransportError};

    // Config
    pub use crate::config::{BridgeConfig, BridgeConfigBuilder};

    // Transport
    pub use crate::transport::{
        Channel, ChannelOptions, Envelope, Inbound, MemoryTransport, RejectReason, Reply,
        SendOptions, Subscription, Topic, Transport,
    };
    #[cfg(feature = "ws-native")]
    pub use crate::transport::native::{WsConfig, WsTransport};
    #[cfg(all(feature = "wasm", target_arch = "wasm32"))]
    pub use crate::transport::wasm::WindowTransport;

    // Bridge + trust
    pub use crate::bridge::{Bridge, BridgeOptions};
    pub use crate::trust::{Referrer, ReputationStatus, TrustedOrigins};

    // RPC
    pub use crate::rpc::{
        codes, Acknowledgement, DialogError, DialogSnapshot, DialogState, Dispatch, Display,
        ErrorAction, KeyValueStore, KeyVault, LifecycleActor, LifecycleHandle, MemoryStore, Method,
        Mode, PasskeyProvider, PasskeyWallet, RequestLifecycle, RequestState, RpcCall,
        RpcErrorObject, RpcRequest, RpcResponse, UserCommand,
    };

    // Classifier
    pub use crate::classify::{classify, ClassificationResult, Presentation, TxType};
}
