//! Newtypes shared by the RPC and classifier layers. Both serialize exactly as
//! host pages send them.

pub mod amount;

pub use amount::{base_units_to_decimal, lamports_to_sol};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ─── RequestId ───────────────────────────────────────────────────────────────

/// Identity of an RPC request. Host pages send either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Extract a request id from a raw JSON value, if it is a string or an integer.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Number),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// ─── PubkeyStr ───────────────────────────────────────────────────────────────

/// Base58 wallet address as the host page sees it. Not validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PubkeyStr(String);

impl PubkeyStr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse into a `Pubkey`; fails for anything that is not a 32-byte base58 key.
    pub fn parse(&self) -> Option<solana_pubkey::Pubkey> {
        solana_pubkey::Pubkey::from_str(&self.0).ok()
    }
}

impl std::fmt::Display for PubkeyStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PubkeyStr {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PubkeyStr {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<solana_pubkey::Pubkey> for PubkeyStr {
    fn from(pk: solana_pubkey::Pubkey) -> Self {
        Self(pk.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_untagged_serde() {
        let n: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(n, RequestId::Number(7));
        let s: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(s, RequestId::String("abc".into()));
        assert_eq!(serde_json::to_string(&n).unwrap(), "7");
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_request_id_from_value_rejects_other_shapes() {
        assert!(RequestId::from_value(&serde_json::json!(null)).is_none());
        assert!(RequestId::from_value(&serde_json::json!({"id": 1})).is_none());
        assert!(RequestId::from_value(&serde_json::json!(1.5)).is_none());
        assert_eq!(
            RequestId::from_value(&serde_json::json!(42)),
            Some(RequestId::Number(42))
        );
    }

    #[test]
    fn test_pubkey_str_is_a_plain_json_string() {
        let pk: PubkeyStr = serde_json::from_str("\"11111111111111111111111111111111\"").unwrap();
        assert_eq!(pk.parse(), Some(solana_pubkey::Pubkey::default()));
        assert_eq!(serde_json::to_value(&pk).unwrap(), serde_json::json!(pk.as_str()));
        assert!(PubkeyStr::from("not-a-key").parse().is_none());
    }
}
