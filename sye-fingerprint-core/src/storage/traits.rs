//! Backend interface shared by both storage tiers.

/// Minimal string key-value store.
///
/// Writes are upserts keyed by `key`, so concurrent writers of the same value
/// converge.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> super::StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set(&self, key: &str, value: &str) -> super::StorageResult<()>;
}
