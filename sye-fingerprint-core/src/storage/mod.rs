//! Key-value storage tiers backing the device identity.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{StorageError, StorageResult};
pub use file::{DocumentStore, KeyFileStore};
pub use memory::{MemoryStore, UnavailableStore};
pub use traits::KeyValueStore;
