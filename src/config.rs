//! Bridge configuration — defaults, builder, and environment loading.

use std::time::Duration;

use crate::error::BridgeError;
use crate::rpc::state::{Display, Mode};
use crate::trust::TrustedOrigins;

/// Default `targetOrigin` for outbound posts.
pub const DEFAULT_TARGET_ORIGIN: &str = "*";

/// Default bound on how long `send_async` waits for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Display name used when creating a new passkey wallet.
pub const DEFAULT_WALLET_NAME: &str = "Lightcone Wallet";

pub const ENV_SELF_ORIGIN: &str = "WALLET_BRIDGE_SELF_ORIGIN";
pub const ENV_TRUSTED_ORIGINS: &str = "WALLET_BRIDGE_TRUSTED_ORIGINS";
pub const ENV_TARGET_ORIGIN: &str = "WALLET_BRIDGE_TARGET_ORIGIN";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "WALLET_BRIDGE_REQUEST_TIMEOUT_MS";
pub const ENV_WALLET_NAME: &str = "WALLET_BRIDGE_WALLET_NAME";

/// Configuration shared by the transport, trust policy, and request lifecycle.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub trusted_origins: TrustedOrigins,
    pub default_target_origin: String,
    pub request_timeout: Duration,
    pub wallet_name: String,
    pub display: Display,
    pub mode: Mode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            trusted_origins: TrustedOrigins::default(),
            default_target_origin: DEFAULT_TARGET_ORIGIN.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            wallet_name: DEFAULT_WALLET_NAME.to_string(),
            display: Display::default(),
            mode: Mode::default(),
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Load configuration from `WALLET_BRIDGE_*` environment variables.
    ///
    /// Unset variables fall back to defaults. A malformed timeout is an error.
    pub fn from_env() -> Result<Self, BridgeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BridgeError> {
        let mut builder = Self::builder();

        let self_origin = lookup(ENV_SELF_ORIGIN);
        let allowlist = lookup(ENV_TRUSTED_ORIGINS).unwrap_or_default();
        builder = builder.trusted_origins(TrustedOrigins::parse(self_origin, &allowlist));

        if let Some(origin) = lookup(ENV_TARGET_ORIGIN) {
            builder = builder.default_target_origin(origin);
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            let ms: u64 = raw.trim().parse().map_err(|_| {
                BridgeError::Config(format!("{} must be an integer, got {:?}", ENV_REQUEST_TIMEOUT_MS, raw))
            })?;
            builder = builder.request_timeout(Duration::from_millis(ms));
        }
        if let Some(name) = lookup(ENV_WALLET_NAME) {
            builder = builder.wallet_name(name);
        }

        Ok(builder.build())
    }
}

/// Builder for [`BridgeConfig`].
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    trusted_origins: Option<TrustedOrigins>,
    default_target_origin: Option<String>,
    request_timeout: Option<Duration>,
    wallet_name: Option<String>,
    display: Option<Display>,
    mode: Option<Mode>,
}

impl BridgeConfigBuilder {
    pub fn trusted_origins(mut self, origins: TrustedOrigins) -> Self {
        self.trusted_origins = Some(origins);
        self
    }

    pub fn default_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.default_target_origin = Some(origin.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn wallet_name(mut self, name: impl Into<String>) -> Self {
        self.wallet_name = Some(name.into());
        self
    }

    pub fn display(mut self, display: Display) -> Self {
        self.display = Some(display);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn build(self) -> BridgeConfig {
        let defaults = BridgeConfig::default();
        BridgeConfig {
            trusted_origins: self.trusted_origins.unwrap_or(defaults.trusted_origins),
            default_target_origin: self
                .default_target_origin
                .unwrap_or(defaults.default_target_origin),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            wallet_name: self.wallet_name.unwrap_or(defaults.wallet_name),
            display: self.display.unwrap_or(defaults.display),
            mode: self.mode.unwrap_or(defaults.mode),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.default_target_origin, "*");
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.wallet_name, DEFAULT_WALLET_NAME);
        assert!(!config.trusted_origins.is_trusted("https://evil.example"));
    }

    #[test]
    fn test_from_lookup_reads_all_keys() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            (ENV_SELF_ORIGIN, "https://wallet.lightcone.xyz"),
            (ENV_TRUSTED_ORIGINS, "https://app.lightcone.xyz, https://dev.lightcone.xyz"),
            (ENV_TARGET_ORIGIN, "https://app.lightcone.xyz"),
            (ENV_REQUEST_TIMEOUT_MS, "1500"),
            (ENV_WALLET_NAME, "Test Wallet"),
        ]))
        .unwrap();

        assert!(config.trusted_origins.is_trusted("https://wallet.lightcone.xyz"));
        assert!(config.trusted_origins.is_trusted("https://dev.lightcone.xyz"));
        assert_eq!(config.default_target_origin, "https://app.lightcone.xyz");
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.wallet_name, "Test Wallet");
    }

    #[test]
    fn test_from_lookup_rejects_bad_timeout() {
        let result = BridgeConfig::from_lookup(lookup_from(&[(ENV_REQUEST_TIMEOUT_MS, "soon")]));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_builder_overrides() {
        let config = BridgeConfig::builder()
            .display(Display::Drawer)
            .mode(Mode::Popup)
            .request_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.display, Display::Drawer);
        assert_eq!(config.mode, Mode::Popup);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
