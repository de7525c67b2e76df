//! Dialog state — one instance per wallet surface, owned by the lifecycle.
//!
//! Only the account subset (`accounts`, `accountMetadata`) is persisted; display,
//! mode, referrer and error are session-only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, LifecycleError};
use crate::shared::PubkeyStr;
use crate::trust::Referrer;

use super::keys::KeyValueStore;

pub const KEY_ACCOUNTS: &str = "accounts";
pub const KEY_ACCOUNT_METADATA: &str = "accountMetadata";

// ─── Display / Mode ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Display {
    #[default]
    Floating,
    Drawer,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    Iframe,
    Popup,
    PopupStandalone,
}

// ─── Accounts ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    pub credential_id: String,
    pub last_used: DateTime<Utc>,
}

// ─── DialogError ─────────────────────────────────────────────────────────────

/// Primary action offered by the error panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAction {
    Close,
    Retry,
}

/// A user-visible failure. Never sent to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    MissingKeyMaterial(String),
    Passkey(String),
    Signing(String),
    /// The reputation service blacklisted the referrer's hostname.
    BlockedReferrer(String),
}

impl DialogError {
    pub fn action(&self) -> ErrorAction {
        match self {
            DialogError::MissingKeyMaterial(_) | DialogError::BlockedReferrer(_) => ErrorAction::Close,
            DialogError::Passkey(_) | DialogError::Signing(_) => ErrorAction::Retry,
        }
    }

    pub fn message(&self) -> String {
        match self {
            DialogError::MissingKeyMaterial(what) => format!("Wallet key material not found: {}", what),
            DialogError::Passkey(e) => format!("Passkey failed: {}", e),
            DialogError::Signing(e) => format!("Signing failed: {}", e),
            DialogError::BlockedReferrer(host) => format!("{} has been flagged as unsafe", host),
        }
    }
}

impl From<&LifecycleError> for DialogError {
    fn from(e: &LifecycleError) -> Self {
        match e {
            LifecycleError::MissingKeyMaterial(what) => DialogError::MissingKeyMaterial(what.clone()),
            LifecycleError::Passkey(e) => DialogError::Passkey(e.to_string()),
            other => DialogError::Signing(other.to_string()),
        }
    }
}

// ─── DialogState ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogState {
    pub accounts: Vec<PubkeyStr>,
    pub account_metadata: BTreeMap<PubkeyStr, AccountMetadata>,
    pub display: Display,
    pub error: Option<DialogError>,
    pub mode: Mode,
    pub referrer: Option<Referrer>,
}

impl DialogState {
    pub fn new(display: Display, mode: Mode) -> Self {
        Self {
            display,
            mode,
            ..Default::default()
        }
    }

    /// Load the persisted account subset. Corrupt entries are ignored.
    pub fn restore<S: KeyValueStore + ?Sized>(store: &S, display: Display, mode: Mode) -> Self {
        let mut state = Self::new(display, mode);
        if let Some(raw) = store.get(KEY_ACCOUNTS) {
            match serde_json::from_str(&raw) {
                Ok(accounts) => state.accounts = accounts,
                Err(e) => tracing::warn!("Ignoring corrupt persisted accounts: {}", e),
            }
        }
        if let Some(raw) = store.get(KEY_ACCOUNT_METADATA) {
            match serde_json::from_str(&raw) {
                Ok(metadata) => state.account_metadata = metadata,
                Err(e) => tracing::warn!("Ignoring corrupt persisted account metadata: {}", e),
            }
        }
        state
    }

    pub fn persist<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), BridgeError> {
        store.set(KEY_ACCOUNTS, &serde_json::to_string(&self.accounts)?);
        store.set(KEY_ACCOUNT_METADATA, &serde_json::to_string(&self.account_metadata)?);
        Ok(())
    }

    /// Add (or refresh) an account, most recent first.
    pub fn record_account(&mut self, address: PubkeyStr, credential_id: &str, now: DateTime<Utc>) {
        self.accounts.retain(|a| a != &address);
        self.accounts.insert(0, address.clone());
        self.account_metadata.insert(
            address,
            AccountMetadata {
                credential_id: credential_id.to_string(),
                last_used: now,
            },
        );
    }

    pub fn touch(&mut self, address: &PubkeyStr, now: DateTime<Utc>) {
        if let Some(meta) = self.account_metadata.get_mut(address) {
            meta.last_used = now;
        }
    }

    pub fn clear_accounts(&mut self) {
        self.accounts.clear();
        self.account_metadata.clear();
    }

    /// True while a blacklisted referrer is attached.
    pub fn is_blocked(&self) -> bool {
        matches!(self.error, Some(DialogError::BlockedReferrer(_)))
    }
}
