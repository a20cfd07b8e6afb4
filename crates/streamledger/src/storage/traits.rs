//! Session store trait definition.

use super::StorageResult;

/// Key/value persistence scoped to one session scope.
///
/// Reads and writes are synchronous: the engine persists a whole-history
/// snapshot after every ledger mutation and must never suspend doing so.
/// There is a single writer per session, so last-writer-wins is fine.
pub trait SessionStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key was never written or was removed.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// List keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Check whether a key is present.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
