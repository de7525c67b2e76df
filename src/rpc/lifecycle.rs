//! Per-request state machine, from arrival to response.
//!
//! ```text
//! RECEIVED ─┬─▶ AUTO_RESOLVED ──────────────────────────┐
//!           ├─▶ AWAITING_APPROVAL ─┬─▶ APPROVED ─┬──────┼─▶ RESPONDED ─▶ CLOSED
//!           │         ▲            │             │      │
//!           │         └── retry ───┼─────────────┘      │
//!           │                      └─▶ REJECTED ────────┤
//!           └─▶ (short-circuit: disconnect, busy, blocked, invalid) ─┘
//! ```
//!
//! At most one request is current. A request that needs the user while
//! another is current is answered immediately with "already pending"; nothing
//! queues.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use solana_signer::Signer;

use crate::classify::Presentation;
use crate::config::BridgeConfig;
use crate::error::{LifecycleError, PasskeyError};
use crate::shared::{PubkeyStr, RequestId};
use crate::transport::{Channel, Envelope, Inbound, Topic};
use crate::trust::Referrer;

use super::keys::{KeyValueStore, KeyVault, PasskeyProvider, PasskeyWallet};
use super::state::{DialogError, DialogState, Display, Mode};
use super::{
    Acknowledgement, ConnectResult, DisconnectResult, Method, RequestParseError, RpcCall,
    RpcErrorObject, RpcRequest, RpcResponse, SignMessageResult,
};

// ─── RequestState ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Received,
    AutoResolved,
    AwaitingApproval,
    Approved,
    Rejected,
    Responded,
    Closed,
}

impl RequestState {
    /// Edges of the lifecycle graph.
    pub fn can_advance(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Received, AutoResolved)
                | (Received, AwaitingApproval)
                | (Received, Responded)
                | (AutoResolved, Responded)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Rejected)
                | (Approved, Responded)
                | (Approved, Rejected)
                | (Approved, AwaitingApproval)
                | (Rejected, Responded)
                | (Responded, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == RequestState::Closed
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestState::Received => "RECEIVED",
            RequestState::AutoResolved => "AUTO_RESOLVED",
            RequestState::AwaitingApproval => "AWAITING_APPROVAL",
            RequestState::Approved => "APPROVED",
            RequestState::Rejected => "REJECTED",
            RequestState::Responded => "RESPONDED",
            RequestState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

// ─── PendingRequest ──────────────────────────────────────────────────────────

/// A received request and where it stands.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request: RpcRequest,
    /// Where the response goes.
    pub origin: String,
    /// Correlation id of the carrying envelope, reused for the response.
    pub correlation_id: Option<String>,
    pub received_at: DateTime<Utc>,
    state: RequestState,
    history: Vec<RequestState>,
}

impl PendingRequest {
    pub fn new(request: RpcRequest, origin: &str, correlation_id: Option<String>) -> Self {
        Self {
            request,
            origin: origin.to_string(),
            correlation_id,
            received_at: Utc::now(),
            state: RequestState::Received,
            history: vec![RequestState::Received],
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.request.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Every state visited, in order.
    pub fn history(&self) -> &[RequestState] {
        &self.history
    }

    pub fn advance(&mut self, next: RequestState) -> Result<(), LifecycleError> {
        if !self.state.can_advance(next) {
            return Err(LifecycleError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!("Request {}: {} -> {}", self.request.id, self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// What [`RequestLifecycle::handle`] did with an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Answered without user involvement (`connect` with a known key).
    AutoResolved(RequestId),
    /// Now the current request.
    AwaitingApproval(RequestId),
    /// Answered immediately: disconnect, invalid request, blocked referrer.
    Responded(RequestId),
    /// Answered with "request already pending".
    Busy(RequestId),
    /// Nothing to act on or nobody to answer.
    Ignored,
}

// ─── RequestLifecycle ────────────────────────────────────────────────────────

/// Owns the dialog state and drives each request through its states.
pub struct RequestLifecycle<S, P> {
    channel: Arc<Channel>,
    store: S,
    passkeys: P,
    wallet_name: String,
    state: DialogState,
    current: Option<PendingRequest>,
}

impl<S: KeyValueStore, P: PasskeyProvider> RequestLifecycle<S, P> {
    /// Restores the persisted account subset from `store`.
    pub fn new(channel: Arc<Channel>, store: S, passkeys: P, config: &BridgeConfig) -> Self {
        let state = DialogState::restore(&store, config.display, config.mode);
        Self {
            channel,
            store,
            passkeys,
            wallet_name: config.wallet_name.clone(),
            state,
            current: None,
        }
    }

    pub fn state(&self) -> &DialogState {
        &self.state
    }

    pub fn current(&self) -> Option<&PendingRequest> {
        self.current.as_ref()
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Approval UI for the current request.
    pub fn presentation(&self) -> Option<Presentation> {
        self.current.as_ref().map(|p| Presentation::for_call(&p.request.call))
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// Process an `rpc-requests` / `rpc-request` envelope from a trusted origin.
    pub fn handle(&mut self, inbound: &Inbound) -> Dispatch {
        let raw = match extract_request(&inbound.envelope) {
            Some(raw) => raw,
            None => return Dispatch::Ignored,
        };

        let request = match RpcRequest::parse(&raw) {
            Ok(request) => request,
            Err(RequestParseError::MissingId) => {
                tracing::warn!("Dropping request without id from {}", inbound.origin);
                return Dispatch::Ignored;
            }
            Err(RequestParseError::Rejected { id, method, error }) => {
                tracing::warn!("Rejecting request {}: {}", id, error.message);
                let response = RpcResponse::error(id.clone(), method.as_deref(), error);
                self.post_response(&inbound.origin, inbound.envelope.id.as_deref(), &response);
                return Dispatch::Responded(id);
            }
        };

        let mut pending = PendingRequest::new(request, &inbound.origin, inbound.envelope.id.clone());
        let id = pending.id().clone();

        if self.state.is_blocked() {
            self.short_circuit(&mut pending, RpcErrorObject::unauthorized());
            return Dispatch::Responded(id);
        }

        // Neither of these ever becomes current, so they are answered even
        // while another request awaits the user.
        match pending.request.method() {
            Method::Connect => {
                if let Some(public_key) = self.vault().public_key() {
                    if let Err(e) = pending.advance(RequestState::AutoResolved) {
                        tracing::error!("Request {}: {}", id, e);
                        return Dispatch::Ignored;
                    }
                    let result = to_value(ConnectResult {
                        public_key,
                        connected: true,
                    });
                    self.answer(&mut pending, result);
                    return Dispatch::AutoResolved(id);
                }
            }
            Method::Disconnect => {
                self.disconnect();
                let result = to_value(DisconnectResult { disconnected: true });
                self.answer(&mut pending, result);
                return Dispatch::Responded(id);
            }
            _ => {}
        }

        if self.current.is_some() {
            self.short_circuit(&mut pending, RpcErrorObject::already_pending());
            return Dispatch::Busy(id);
        }

        if let Err(e) = pending.advance(RequestState::AwaitingApproval) {
            tracing::error!("Request {}: {}", id, e);
            return Dispatch::Ignored;
        }
        tracing::info!(
            "Request {} ({}) awaiting approval",
            id,
            pending.request.method()
        );
        self.current = Some(pending);
        Dispatch::AwaitingApproval(id)
    }

    // ── User decisions ───────────────────────────────────────────────────────

    /// Approve the current request.
    ///
    /// On failure the request stays current with a [`DialogError`] set;
    /// the user then retries or closes.
    ///
    /// The request stays current (APPROVED) while the passkey or signing step
    /// runs, so dropping this future part-way leaves it rejectable.
    pub async fn approve(&mut self) -> Result<RequestId, LifecycleError> {
        let (id, call) = {
            let pending = self.current.as_mut().ok_or(LifecycleError::NoCurrentRequest)?;
            pending.advance(RequestState::Approved)?;
            (pending.id().clone(), pending.request.call.clone())
        };

        match self.execute(&call).await {
            Ok(result) => {
                let mut pending = self.current.take().ok_or(LifecycleError::NoCurrentRequest)?;
                let response = RpcResponse::ok(&pending.request, result);
                self.state.error = None;
                if let Err(e) = pending.advance(RequestState::Responded) {
                    self.current = Some(pending);
                    return Err(e);
                }
                self.post_response(&pending.origin, pending.correlation_id.as_deref(), &response);
                pending.advance(RequestState::Closed)?;
                tracing::info!("Request {} approved and answered", id);
                Ok(id)
            }
            Err(LifecycleError::Encode(reason)) => {
                tracing::error!("Request {}: failed to encode result: {}", id, reason);
                self.reject_with(RpcErrorObject::internal(&reason))
            }
            Err(e) => {
                if matches!(e, LifecycleError::MissingKeyMaterial(_)) {
                    tracing::error!("Request {}: {}", id, e);
                } else {
                    tracing::warn!("Request {}: {}", id, e);
                }
                self.state.error = Some(DialogError::from(&e));
                Err(e)
            }
        }
    }

    /// Reject the current request with 4001.
    pub fn reject(&mut self) -> Result<RequestId, LifecycleError> {
        self.reject_with(RpcErrorObject::user_rejected())
    }

    /// Clear a retryable error and present the request again.
    pub fn retry(&mut self) -> Result<(), LifecycleError> {
        let pending = self.current.as_mut().ok_or(LifecycleError::NoCurrentRequest)?;
        match &self.state.error {
            Some(error) if error.action() == super::state::ErrorAction::Retry => {}
            _ => {
                return Err(LifecycleError::InvalidState {
                    from: pending.state().to_string(),
                    to: RequestState::AwaitingApproval.to_string(),
                })
            }
        }
        pending.advance(RequestState::AwaitingApproval)?;
        self.state.error = None;
        Ok(())
    }

    /// Close the dialog. A current request is rejected with 4001.
    pub fn close(&mut self) -> Result<Option<RequestId>, LifecycleError> {
        if self.current.is_some() {
            return self.reject().map(Some);
        }
        if !self.state.is_blocked() {
            self.state.error = None;
        }
        Ok(None)
    }

    pub fn set_display(&mut self, display: Display) {
        self.state.display = display;
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.state.mode = mode;
    }

    /// Attach the referrer and its reputation verdict.
    ///
    /// A blacklisted referrer blocks the dialog: the current request (if any)
    /// and every later one is answered with 4100.
    pub fn set_referrer(&mut self, referrer: Referrer) {
        if referrer.reputation.admits() {
            if self.state.is_blocked() {
                self.state.error = None;
            }
        } else {
            tracing::warn!("Referrer {} is blacklisted", referrer.hostname);
            self.state.error = Some(DialogError::BlockedReferrer(referrer.hostname.clone()));
            if self.current.is_some() {
                if let Err(e) = self.reject_with(RpcErrorObject::unauthorized()) {
                    tracing::error!("Failed to reject current request: {}", e);
                }
                self.state.error = Some(DialogError::BlockedReferrer(referrer.hostname.clone()));
            }
        }
        self.state.referrer = Some(referrer);
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn vault(&self) -> KeyVault<'_, S> {
        KeyVault::new(&self.store)
    }

    async fn execute(&mut self, call: &RpcCall) -> Result<Value, LifecycleError> {
        match call {
            RpcCall::Connect => {
                let wallet = self.obtain_wallet().await?;
                to_value(ConnectResult {
                    public_key: wallet.public_key,
                    connected: true,
                })
            }
            RpcCall::SignMessage(params) => {
                let (address, keypair) = self.vault().signer()?;
                let signature = keypair.sign_message(&params.message);
                self.touch(&address);
                to_value(SignMessageResult {
                    signature: signature.to_string(),
                    public_key: address,
                })
            }
            other => {
                let (address, _) = self.vault().signer()?;
                self.touch(&address);
                to_value(Acknowledgement::unsigned(other.method()))
            }
        }
    }

    /// Authenticate the stored credential, falling back to creating a passkey.
    async fn obtain_wallet(&mut self) -> Result<PasskeyWallet, LifecycleError> {
        let wallet = match self.vault().credential_id() {
            Some(credential_id) => match self.passkeys.authenticate(&credential_id).await {
                Ok(wallet) => wallet,
                Err(PasskeyError::NoCredential) => {
                    tracing::info!("Stored credential not found, creating a new passkey");
                    self.passkeys.create(&self.wallet_name).await?
                }
                Err(e) => return Err(e.into()),
            },
            None => self.passkeys.create(&self.wallet_name).await?,
        };

        self.vault().store_wallet(&wallet);
        self.state
            .record_account(wallet.public_key.clone(), &wallet.credential_id, Utc::now());
        self.persist();
        Ok(wallet)
    }

    fn disconnect(&mut self) {
        self.vault().clear_session();
        self.state.clear_accounts();
        self.persist();
    }

    fn touch(&mut self, address: &PubkeyStr) {
        self.state.touch(address, Utc::now());
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.state.persist(&self.store) {
            tracing::warn!("Failed to persist accounts: {}", e);
        }
    }

    fn reject_with(&mut self, error: RpcErrorObject) -> Result<RequestId, LifecycleError> {
        let mut pending = self.current.take().ok_or(LifecycleError::NoCurrentRequest)?;
        if let Err(e) = pending.advance(RequestState::Rejected) {
            self.current = Some(pending);
            return Err(e);
        }
        let response = RpcResponse::error(
            pending.id().clone(),
            Some(pending.request.method().as_str()),
            error,
        );
        self.state.error = None;
        self.finish(&mut pending, &response);
        tracing::info!("Request {} rejected", pending.id());
        Ok(pending.request.id)
    }

    /// Answer a request that never becomes current with its result, or with
    /// an internal error if the result could not be encoded.
    fn answer(&self, pending: &mut PendingRequest, result: Result<Value, LifecycleError>) {
        let response = match result {
            Ok(result) => RpcResponse::ok(&pending.request, result),
            Err(e) => {
                tracing::error!("Request {}: {}", pending.id(), e);
                RpcResponse::error(
                    pending.id().clone(),
                    Some(pending.request.method().as_str()),
                    RpcErrorObject::internal(&e.to_string()),
                )
            }
        };
        self.finish(pending, &response);
    }

    /// Answer a request that never becomes current.
    fn short_circuit(&self, pending: &mut PendingRequest, error: RpcErrorObject) {
        tracing::info!("Request {} answered: {}", pending.id(), error.message);
        let response = RpcResponse::error(
            pending.id().clone(),
            Some(pending.request.method().as_str()),
            error,
        );
        self.finish(pending, &response);
    }

    /// RESPONDED → CLOSED, posting the response and the trailing `close`.
    fn finish(&self, pending: &mut PendingRequest, response: &RpcResponse) {
        if let Err(e) = pending.advance(RequestState::Responded) {
            tracing::error!("Request {}: {}", pending.id(), e);
            return;
        }
        self.post_response(&pending.origin, pending.correlation_id.as_deref(), response);
        if let Err(e) = pending.advance(RequestState::Closed) {
            tracing::error!("Request {}: {}", pending.id(), e);
        }
    }

    fn post_response(&self, origin: &str, correlation_id: Option<&str>, response: &RpcResponse) {
        let posted = match correlation_id {
            Some(id) => self.channel.reply(id, Topic::RpcResponse, response, Some(origin)),
            None => self.channel.send(Topic::RpcResponse, response, Some(origin)),
        };
        if let Err(e) = posted {
            tracing::warn!("Failed to post response for {}: {}", response.id, e);
            return;
        }
        if let Err(e) = self.channel.notify(Topic::Close, Some(origin)) {
            tracing::warn!("Failed to post close: {}", e);
        }
    }
}

/// The request object an envelope carries: the head of an `rpc-requests`
/// batch, or an `rpc-request` payload.
fn extract_request(envelope: &Envelope) -> Option<Value> {
    match (envelope.topic, envelope.payload.as_ref()) {
        (Topic::RpcRequests, Some(Value::Array(items))) => {
            if items.len() > 1 {
                tracing::debug!("Discarding {} trailing batched request(s)", items.len() - 1);
            }
            match items.first() {
                Some(head @ Value::Object(_)) => Some(head.clone()),
                _ => {
                    tracing::warn!("Dropping rpc-requests batch without a request object");
                    None
                }
            }
        }
        (Topic::RpcRequest, Some(obj @ Value::Object(_))) => Some(obj.clone()),
        (Topic::RpcRequests | Topic::RpcRequest, _) => {
            tracing::warn!("Dropping {} envelope with unexpected payload", envelope.topic);
            None
        }
        _ => None,
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, LifecycleError> {
    serde_json::to_value(value).map_err(|e| LifecycleError::Encode(e.to_string()))
}
