//! Key material — persisted store, passkey provider contract, signer derivation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use solana_keypair::Keypair;
use solana_signer::Signer;

use crate::error::{LifecycleError, PasskeyError};
use crate::shared::PubkeyStr;

pub const KEY_CREDENTIAL_ID: &str = "credentialId";
pub const KEY_PUBLIC_KEY: &str = "publicKey";
pub const SEED_PREFIX: &str = "seed_";

// ─── KeyValueStore ───────────────────────────────────────────────────────────

/// Persisted string store (`localStorage` in a browser).
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }
}

// ─── Passkeys ────────────────────────────────────────────────────────────────

/// What the passkey module hands back after a WebAuthn ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasskeyWallet {
    pub credential_id: String,
    pub public_key: PubkeyStr,
    pub master_seed: Vec<u8>,
}

/// The external passkey / key-derivation module.
#[allow(async_fn_in_trait)]
pub trait PasskeyProvider {
    /// Register a new passkey and derive a wallet from it.
    async fn create(&self, name: &str) -> Result<PasskeyWallet, PasskeyError>;

    /// Re-derive the wallet behind an existing credential.
    ///
    /// Fails with [`PasskeyError::NoCredential`] when the authenticator no
    /// longer holds `credential_id`.
    async fn authenticate(&self, credential_id: &str) -> Result<PasskeyWallet, PasskeyError>;
}

// ─── KeyVault ────────────────────────────────────────────────────────────────

/// Typed view over the persisted key material.
pub struct KeyVault<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyValueStore + ?Sized> KeyVault<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn credential_id(&self) -> Option<String> {
        self.store.get(KEY_CREDENTIAL_ID)
    }

    pub fn public_key(&self) -> Option<PubkeyStr> {
        self.store.get(KEY_PUBLIC_KEY).map(PubkeyStr::from)
    }

    /// Decoded seed for `address`, if one is stored and decodes.
    pub fn seed(&self, address: &PubkeyStr) -> Option<Vec<u8>> {
        let raw = self.store.get(&seed_key(address))?;
        match BASE64.decode(raw.as_bytes()) {
            Ok(seed) => Some(seed),
            Err(e) => {
                tracing::warn!("Stored seed for {} is not valid base64: {}", address, e);
                None
            }
        }
    }

    pub fn has_key_material(&self) -> bool {
        self.public_key().map(|pk| self.seed(&pk).is_some()).unwrap_or(false)
    }

    /// Persist a freshly created or authenticated wallet.
    pub fn store_wallet(&self, wallet: &PasskeyWallet) {
        self.store.set(KEY_CREDENTIAL_ID, &wallet.credential_id);
        self.store.set(KEY_PUBLIC_KEY, wallet.public_key.as_str());
        self.store
            .set(&seed_key(&wallet.public_key), &BASE64.encode(&wallet.master_seed));
    }

    /// Forget the session key material. The credential id is kept so a later
    /// connect re-authenticates the same passkey.
    pub fn clear_session(&self) {
        if let Some(pk) = self.public_key() {
            self.store.remove(&seed_key(&pk));
        }
        self.store.remove(KEY_PUBLIC_KEY);
    }

    /// Signing keypair for the stored account.
    pub fn signer(&self) -> Result<(PubkeyStr, Keypair), LifecycleError> {
        let address = self
            .public_key()
            .ok_or_else(|| LifecycleError::MissingKeyMaterial("public key".into()))?;
        let seed = self
            .seed(&address)
            .ok_or_else(|| LifecycleError::MissingKeyMaterial(format!("seed for {}", address)))?;
        let keypair = keypair_from_seed(&seed)?;

        if keypair.pubkey().to_string() != address.as_str() {
            return Err(LifecycleError::Signing(format!(
                "seed does not derive stored account {}",
                address
            )));
        }
        Ok((address, keypair))
    }
}

fn seed_key(address: &PubkeyStr) -> String {
    format!("{}{}", SEED_PREFIX, address)
}

/// Ed25519 keypair from the first 32 bytes of a master seed.
pub fn keypair_from_seed(seed: &[u8]) -> Result<Keypair, LifecycleError> {
    let secret: [u8; 32] = seed
        .get(..32)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| LifecycleError::Signing(format!("seed too short: {} bytes", seed.len())))?;
    Ok(Keypair::new_from_array(secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(seed_byte: u8) -> PasskeyWallet {
        let seed = vec![seed_byte; 64];
        let keypair = keypair_from_seed(&seed).unwrap();
        PasskeyWallet {
            credential_id: format!("cred-{}", seed_byte),
            public_key: PubkeyStr::from(keypair.pubkey()),
            master_seed: seed,
        }
    }

    #[test]
    fn test_memory_store_basics() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.set("a", "1");
        assert_eq!(store.get("a").as_deref(), Some("1"));
        store.remove("a");
        assert_eq!(store.get("a"), None);
    }

    #[test]
    fn test_store_wallet_layout() {
        let store = MemoryStore::new();
        let w = wallet(7);
        KeyVault::new(&store).store_wallet(&w);

        assert_eq!(store.get(KEY_CREDENTIAL_ID).as_deref(), Some("cred-7"));
        assert_eq!(store.get(KEY_PUBLIC_KEY).as_deref(), Some(w.public_key.as_str()));
        let seed_raw = store.get(&format!("seed_{}", w.public_key)).unwrap();
        assert_eq!(BASE64.decode(seed_raw).unwrap(), w.master_seed);
    }

    #[test]
    fn test_signer_matches_stored_account() {
        let store = MemoryStore::new();
        let w = wallet(9);
        let vault = KeyVault::new(&store);
        vault.store_wallet(&w);

        let (address, keypair) = vault.signer().unwrap();
        assert_eq!(address, w.public_key);
        let sig = keypair.sign_message(b"hello");
        assert_eq!(sig, keypair.sign_message(b"hello"));
        assert_ne!(sig, keypair.sign_message(b"other"));
    }

    #[test]
    fn test_signer_missing_material() {
        let store = MemoryStore::new();
        let vault = KeyVault::new(&store);
        assert!(matches!(vault.signer(), Err(LifecycleError::MissingKeyMaterial(_))));

        store.set(KEY_PUBLIC_KEY, "SomeKey");
        assert!(matches!(vault.signer(), Err(LifecycleError::MissingKeyMaterial(_))));
        assert!(!vault.has_key_material());
    }

    #[test]
    fn test_signer_rejects_mismatched_seed() {
        let store = MemoryStore::new();
        let vault = KeyVault::new(&store);
        let mut w = wallet(1);
        w.public_key = wallet(2).public_key;
        vault.store_wallet(&w);
        assert!(matches!(vault.signer(), Err(LifecycleError::Signing(_))));
    }

    #[test]
    fn test_clear_session_keeps_credential() {
        let store = MemoryStore::new();
        let vault = KeyVault::new(&store);
        let w = wallet(3);
        vault.store_wallet(&w);
        vault.clear_session();

        assert_eq!(vault.public_key(), None);
        assert_eq!(vault.seed(&w.public_key), None);
        assert_eq!(vault.credential_id().as_deref(), Some("cred-3"));
    }

    #[test]
    fn test_short_seed() {
        assert!(matches!(keypair_from_seed(&[1u8; 16]), Err(LifecycleError::Signing(_))));
    }
}
