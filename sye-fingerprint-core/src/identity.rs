//! Persistent device identifier with two-tier storage.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::storage::{
    file::{DEFAULT_DATABASE, DEFAULT_OBJECT_STORE},
    DocumentStore, KeyFileStore, KeyValueStore, MemoryStore,
};

/// Key under which both tiers persist the identifier.
pub const DEVICE_ID_KEY: &str = "deviceId";

/// Random 256-bit device identifier, URL-safe base64 without padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Mints a fresh identifier from the OS random source.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Encoded identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves the device identifier across a primary and a fallback tier.
///
/// Storage is best-effort. Every backend error is logged and absorbed, so
/// [`IdentityStore::get_or_create_device_id`] always yields an identifier; when
/// both tiers are unusable a fresh one is minted per call.
#[derive(Clone)]
pub struct IdentityStore {
    primary: Arc<dyn KeyValueStore>,
    fallback: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}

impl IdentityStore {
    /// Builds a store over two arbitrary tiers.
    #[must_use]
    pub fn new(primary: Arc<dyn KeyValueStore>, fallback: Arc<dyn KeyValueStore>) -> Self {
        Self { primary, fallback }
    }

    /// Both tiers in memory. The identifier lives as long as the store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    /// Document store at `<root>/device_fp/kv.json` backed by key files at `<root>/kv/`.
    #[must_use]
    pub fn on_disk(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::new(
            Arc::new(DocumentStore::new(root, DEFAULT_DATABASE, DEFAULT_OBJECT_STORE)),
            Arc::new(KeyFileStore::new(root.join(DEFAULT_OBJECT_STORE))),
        )
    }

    /// Returns the persisted identifier, creating and storing one if needed.
    ///
    /// Lookup order is primary, then fallback. A tier missing the value is
    /// backfilled from the other so both converge.
    #[must_use]
    pub fn get_or_create_device_id(&self) -> DeviceId {
        let from_primary = read_tier(self.primary.as_ref(), "primary");
        let from_fallback = read_tier(self.fallback.as_ref(), "fallback");

        match (from_primary, from_fallback) {
            (Some(id), fallback) => {
                if fallback.is_none() {
                    write_tier(self.fallback.as_ref(), "fallback", &id);
                }
                DeviceId(id)
            }
            (None, Some(id)) => {
                log::debug!("device id found only in fallback tier, backfilling primary");
                write_tier(self.primary.as_ref(), "primary", &id);
                DeviceId(id)
            }
            (None, None) => {
                let id = DeviceId::generate();
                log::debug!("no stored device id, minted a new one");
                write_tier(self.primary.as_ref(), "primary", id.as_str());
                write_tier(self.fallback.as_ref(), "fallback", id.as_str());
                id
            }
        }
    }
}

fn read_tier(store: &dyn KeyValueStore, tier: &str) -> Option<String> {
    match store.get(DEVICE_ID_KEY) {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(err) => {
            log::warn!("device id read from {tier} storage failed: {err}");
            None
        }
    }
}

fn write_tier(store: &dyn KeyValueStore, tier: &str, value: &str) {
    if let Err(err) = store.set(DEVICE_ID_KEY, value) {
        log::warn!("device id write to {tier} storage failed: {err}");
    }
}
