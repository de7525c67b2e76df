//! RPC wire types — requests from the host page, responses back to it.
//!
//! Requests are parsed into a tagged [`RpcCall`] at the trust boundary: unknown
//! methods and malformed params become structured [`RpcErrorObject`]s and are
//! never forwarded.

pub mod actor;
pub mod keys;
pub mod lifecycle;
pub mod state;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shared::{PubkeyStr, RequestId};

pub use actor::{DialogSnapshot, Inbox, LifecycleActor, LifecycleHandle, UserCommand};
pub use keys::{KeyValueStore, KeyVault, MemoryStore, PasskeyProvider, PasskeyWallet};
pub use lifecycle::{Dispatch, PendingRequest, RequestLifecycle, RequestState};
pub use state::{AccountMetadata, DialogError, DialogState, Display, ErrorAction, Mode};

// ─── Error codes ─────────────────────────────────────────────────────────────

/// Provider error codes (EIP-1193 / JSON-RPC conventions).
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A request is already awaiting the user.
    pub const RESOURCE_UNAVAILABLE: i64 = -32002;
}

// ─── Method ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "connect")]
    Connect,
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "signMessage")]
    SignMessage,
    #[serde(rename = "signTransaction")]
    SignTransaction,
    #[serde(rename = "signAllTransactions")]
    SignAllTransactions,
    #[serde(rename = "sendTransaction")]
    SendTransaction,
    #[serde(rename = "wallet_sendCalls")]
    SendCalls,
    #[serde(rename = "wallet_prepareCalls")]
    PrepareCalls,
    #[serde(rename = "wallet_sendPreparedCalls")]
    SendPreparedCalls,
    #[serde(rename = "wallet_getCapabilities")]
    GetCapabilities,
    #[serde(rename = "wallet_getAssets")]
    GetAssets,
    #[serde(rename = "wallet_grantPermissions")]
    GrantPermissions,
    #[serde(rename = "wallet_revokePermissions")]
    RevokePermissions,
    #[serde(rename = "wallet_getPermissions")]
    GetPermissions,
    #[serde(rename = "wallet_getCallsStatus")]
    GetCallsStatus,
}

impl Method {
    pub const ALL: [Method; 15] = [
        Method::Connect,
        Method::Disconnect,
        Method::SignMessage,
        Method::SignTransaction,
        Method::SignAllTransactions,
        Method::SendTransaction,
        Method::SendCalls,
        Method::PrepareCalls,
        Method::SendPreparedCalls,
        Method::GetCapabilities,
        Method::GetAssets,
        Method::GrantPermissions,
        Method::RevokePermissions,
        Method::GetPermissions,
        Method::GetCallsStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::Disconnect => "disconnect",
            Method::SignMessage => "signMessage",
            Method::SignTransaction => "signTransaction",
            Method::SignAllTransactions => "signAllTransactions",
            Method::SendTransaction => "sendTransaction",
            Method::SendCalls => "wallet_sendCalls",
            Method::PrepareCalls => "wallet_prepareCalls",
            Method::SendPreparedCalls => "wallet_sendPreparedCalls",
            Method::GetCapabilities => "wallet_getCapabilities",
            Method::GetAssets => "wallet_getAssets",
            Method::GrantPermissions => "wallet_grantPermissions",
            Method::RevokePermissions => "wallet_revokePermissions",
            Method::GetPermissions => "wallet_getPermissions",
            Method::GetCallsStatus => "wallet_getCallsStatus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── RpcCall ─────────────────────────────────────────────────────────────────

/// `signMessage` params: the literal bytes to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignMessageParams {
    pub message: Vec<u8>,
    /// Presentation hint (`utf8` / `hex`), if the host sent one.
    pub display: Option<String>,
}

impl SignMessageParams {
    /// Accepts a UTF-8 string, a byte array, `{message, display?}`, or any of
    /// those wrapped in a one-element positional array.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(Self {
                message: s.as_bytes().to_vec(),
                display: None,
            }),
            Value::Array(items) if items.iter().all(Value::is_number) && !items.is_empty() => {
                Ok(Self {
                    message: bytes_from_array(items)?,
                    display: None,
                })
            }
            Value::Array(items) => match items.first() {
                Some(first) => Self::from_value(first),
                None => Err("message is empty".into()),
            },
            Value::Object(map) => {
                let message = map.get("message").ok_or("missing message")?;
                let mut params = Self::from_value(message)?;
                params.display = map.get("display").and_then(Value::as_str).map(str::to_string);
                Ok(params)
            }
            _ => Err("message must be a string or byte array".into()),
        }
    }
}

fn bytes_from_array(items: &[Value]) -> Result<Vec<u8>, String> {
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| format!("invalid byte {}", v))
        })
        .collect()
}

/// A validated request, keyed by method.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    Connect,
    Disconnect,
    SignMessage(SignMessageParams),
    SignTransaction(Value),
    SignAllTransactions(Vec<Value>),
    SendTransaction(Value),
    /// `wallet_sendCalls` / `wallet_prepareCalls`: the call bundle object.
    SendCalls(Value),
    PrepareCalls(Value),
    SendPreparedCalls(Value),
    /// Read-only and permission methods; params pass through untouched.
    Query(Method, Value),
}

impl RpcCall {
    pub fn method(&self) -> Method {
        match self {
            RpcCall::Connect => Method::Connect,
            RpcCall::Disconnect => Method::Disconnect,
            RpcCall::SignMessage(_) => Method::SignMessage,
            RpcCall::SignTransaction(_) => Method::SignTransaction,
            RpcCall::SignAllTransactions(_) => Method::SignAllTransactions,
            RpcCall::SendTransaction(_) => Method::SendTransaction,
            RpcCall::SendCalls(_) => Method::SendCalls,
            RpcCall::PrepareCalls(_) => Method::PrepareCalls,
            RpcCall::SendPreparedCalls(_) => Method::SendPreparedCalls,
            RpcCall::Query(method, _) => *method,
        }
    }

    /// Params as the classifier sees them, if this call carries a payload to classify.
    pub fn transaction_params(&self) -> Option<&Value> {
        match self {
            RpcCall::SignTransaction(v)
            | RpcCall::SendTransaction(v)
            | RpcCall::SendCalls(v)
            | RpcCall::PrepareCalls(v)
            | RpcCall::SendPreparedCalls(v) => Some(v),
            RpcCall::SignAllTransactions(txs) => txs.first(),
            _ => None,
        }
    }

    fn parse(method: Method, params: Value) -> Result<Self, String> {
        match method {
            Method::Connect => Ok(RpcCall::Connect),
            Method::Disconnect => Ok(RpcCall::Disconnect),
            Method::SignMessage => SignMessageParams::from_value(&params).map(RpcCall::SignMessage),
            Method::SignTransaction => require_present(params).map(RpcCall::SignTransaction),
            Method::SendTransaction => require_present(params).map(RpcCall::SendTransaction),
            Method::SignAllTransactions => match params {
                Value::Array(txs) if !txs.is_empty() => Ok(RpcCall::SignAllTransactions(txs)),
                Value::Object(mut map) => match map.remove("transactions") {
                    Some(Value::Array(txs)) if !txs.is_empty() => Ok(RpcCall::SignAllTransactions(txs)),
                    _ => Err("expected a non-empty transactions array".into()),
                },
                _ => Err("expected a non-empty transactions array".into()),
            },
            Method::SendCalls => call_bundle(params).map(RpcCall::SendCalls),
            Method::PrepareCalls => call_bundle(params).map(RpcCall::PrepareCalls),
            Method::SendPreparedCalls => require_present(params).map(RpcCall::SendPreparedCalls),
            other => Ok(RpcCall::Query(other, params)),
        }
    }
}

fn require_present(params: Value) -> Result<Value, String> {
    if params.is_null() {
        Err("params are required".into())
    } else {
        Ok(params)
    }
}

/// A call bundle is `{calls: [...], ...}`, optionally wrapped in a positional array.
fn call_bundle(params: Value) -> Result<Value, String> {
    let bundle = match params {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    match bundle.get("calls") {
        Some(Value::Array(_)) => Ok(bundle),
        _ => Err("expected an object with a calls array".into()),
    }
}

// ─── RpcRequest ──────────────────────────────────────────────────────────────

/// A request accepted from a trusted host. Immutable once received.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: RequestId,
    pub chain_id: Option<String>,
    pub call: RpcCall,
}

/// Why an inbound request could not be accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestParseError {
    /// No usable id, so there is nothing to answer.
    MissingId,
    /// Answerable with a structured error response.
    Rejected {
        id: RequestId,
        method: Option<String>,
        error: RpcErrorObject,
    },
}

impl RpcRequest {
    pub fn new(id: impl Into<RequestId>, call: RpcCall) -> Self {
        Self {
            id: id.into(),
            chain_id: None,
            call,
        }
    }

    pub fn method(&self) -> Method {
        self.call.method()
    }

    /// Validate a raw `{id, method, params?, chainId?}` object.
    pub fn parse(raw: &Value) -> Result<Self, RequestParseError> {
        let id = raw
            .get("id")
            .and_then(RequestId::from_value)
            .ok_or(RequestParseError::MissingId)?;

        let method_name = match raw.get("method").and_then(Value::as_str) {
            Some(m) => m,
            None => {
                return Err(RequestParseError::Rejected {
                    id,
                    method: None,
                    error: RpcErrorObject::invalid_request("missing method"),
                })
            }
        };

        let method = Method::parse(method_name).ok_or_else(|| RequestParseError::Rejected {
            id: id.clone(),
            method: Some(method_name.to_string()),
            error: RpcErrorObject::unsupported_method(method_name),
        })?;

        let params = raw.get("params").cloned().unwrap_or(Value::Null);
        let call = RpcCall::parse(method, params).map_err(|reason| RequestParseError::Rejected {
            id: id.clone(),
            method: Some(method_name.to_string()),
            error: RpcErrorObject::invalid_params(&reason),
        })?;

        Ok(Self {
            id,
            chain_id: raw.get("chainId").and_then(Value::as_str).map(str::to_string),
            call,
        })
    }
}

// ─── RpcResponse ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request")
    }

    pub fn unauthorized() -> Self {
        Self::new(codes::UNAUTHORIZED, "Unauthorized")
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(codes::UNSUPPORTED_METHOD, format!("Unsupported method: {}", method))
            .with_data(serde_json::json!({ "method": method }))
    }

    pub fn disconnected() -> Self {
        Self::new(codes::DISCONNECTED, "Disconnected")
    }

    pub fn invalid_request(reason: &str) -> Self {
        Self::new(codes::INVALID_REQUEST, format!("Invalid request: {}", reason))
    }

    pub fn invalid_params(reason: &str) -> Self {
        Self::new(codes::INVALID_PARAMS, format!("Invalid params: {}", reason))
    }

    pub fn internal(reason: &str) -> Self {
        Self::new(codes::INTERNAL_ERROR, format!("Internal error: {}", reason))
    }

    pub fn already_pending() -> Self {
        Self::new(codes::RESOURCE_UNAVAILABLE, "Request already pending")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcOutcome {
    Result(Value),
    Error(RpcErrorObject),
}

/// Back-reference to the request a response answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRef {
    pub id: RequestId,
    pub method: String,
}

/// `{id, result}` or `{id, error}`, plus a `_request` back-reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    #[serde(flatten)]
    pub outcome: RpcOutcome,
    #[serde(rename = "_request", default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestRef>,
}

impl RpcResponse {
    pub fn ok(request: &RpcRequest, result: Value) -> Self {
        Self {
            id: request.id.clone(),
            outcome: RpcOutcome::Result(result),
            request: Some(RequestRef {
                id: request.id.clone(),
                method: request.method().to_string(),
            }),
        }
    }

    pub fn error(id: RequestId, method: Option<&str>, error: RpcErrorObject) -> Self {
        Self {
            request: method.map(|m| RequestRef {
                id: id.clone(),
                method: m.to_string(),
            }),
            id,
            outcome: RpcOutcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, RpcOutcome::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            RpcOutcome::Result(v) => Some(v),
            RpcOutcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&RpcErrorObject> {
        match &self.outcome {
            RpcOutcome::Error(e) => Some(e),
            RpcOutcome::Result(_) => None,
        }
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub public_key: PubkeyStr,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectResult {
    pub disconnected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageResult {
    /// Base58 ed25519 signature.
    pub signature: String,
    pub public_key: PubkeyStr,
}

/// Approval of a method this wallet does not sign yet. Carries no signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub acknowledged: bool,
    pub signed: bool,
    pub method: String,
}

impl Acknowledgement {
    pub fn unsigned(method: Method) -> Self {
        Self {
            acknowledged: true,
            signed: false,
            method: method.to_string(),
        }
    }
}
