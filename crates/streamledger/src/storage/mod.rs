//! Durable session store.
//!
//! Provides a trait-based key/value abstraction with implementations for:
//! - In-memory storage (tests, single process)
//! - Local filesystem storage (survives restarts)

mod error;
mod local;
mod memory;
mod traits;

use std::path::PathBuf;
use std::sync::Arc;

pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use traits::SessionStore;

/// Create a store based on configuration.
pub fn create_store(config: StoreConfig) -> Arc<dyn SessionStore> {
    match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Local(path) => Arc::new(LocalStore::new(path)),
    }
}

/// Store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StoreConfig {
    /// Process-scoped storage.
    #[default]
    Memory,
    /// Local filesystem storage.
    Local(PathBuf),
}

