//! Trusted-origin policy and referrer reputation gate.
//!
//! `TrustedOrigins::is_trusted` is the only predicate the transport consults.
//! Messages from untrusted origins are dropped before any listener runs and
//! leave no trace the sender could observe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ─── TrustedOrigins ──────────────────────────────────────────────────────────

/// Exact-match origin allowlist plus the same-origin bypass.
///
/// No wildcards and no subdomain matching: `https://app.example.com` does not
/// trust `https://evil.app.example.com` or `https://app.example.com:8443`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedOrigins {
    self_origin: Option<String>,
    allowlist: BTreeSet<String>,
}

impl TrustedOrigins {
    pub fn new<I, S>(self_origin: Option<String>, allowlist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            self_origin: self_origin.filter(|o| !o.is_empty()),
            allowlist: allowlist.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated allowlist (`"https://a.com, https://b.com"`).
    ///
    /// Entries are trimmed; empty entries are ignored.
    pub fn parse(self_origin: Option<String>, allowlist: &str) -> Self {
        Self::new(
            self_origin,
            allowlist
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>(),
        )
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        if self.self_origin.as_deref() == Some(origin) {
            return true;
        }
        self.allowlist.contains(origin)
    }

    pub fn self_origin(&self) -> Option<&str> {
        self.self_origin.as_deref()
    }

    pub fn allowlist(&self) -> impl Iterator<Item = &str> {
        self.allowlist.iter().map(String::as_str)
    }
}

// ─── Referrer reputation ─────────────────────────────────────────────────────

/// Verdict from the remote reputation service for a referrer hostname.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReputationStatus {
    Whitelisted,
    Blacklisted,
    #[default]
    Unknown,
}

impl ReputationStatus {
    /// Only an explicit blacklist verdict blocks a referrer.
    pub fn admits(&self) -> bool {
        !matches!(self, Self::Blacklisted)
    }
}

/// The page that opened or embedded the wallet surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referrer {
    pub origin: String,
    pub hostname: String,
    #[serde(default)]
    pub reputation: ReputationStatus,
}

impl Referrer {
    /// Build a referrer from an origin string, deriving the hostname from it.
    pub fn from_origin(origin: &str, reputation: ReputationStatus) -> Self {
        Self {
            origin: origin.to_string(),
            hostname: hostname_of(origin).to_string(),
            reputation,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.reputation == ReputationStatus::Whitelisted
    }
}

/// Hostname part of an origin (`https://app.example.com:443` → `app.example.com`).
pub fn hostname_of(origin: &str) -> &str {
    let without_scheme = origin.split_once("://").map(|(_, rest)| rest).unwrap_or(origin);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    match host_port.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => host_port,
    }
}
