//! Name-keyed asset cache.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use super::AssetHandle;

/// Fetch attempts per asset before a failure is final.
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// State of one asset.
#[derive(Debug, Clone)]
pub enum AssetSlot {
    /// Fetch in progress; `attempt` counts from 1.
    Pending { attempt: u32 },
    Ready(AssetHandle),
    Failed { reason: String, attempts: u32 },
}

/// Shared, concurrently-updated map from asset name to its slot.
#[derive(Debug, Clone, Default)]
pub struct AssetCache {
    slots: Arc<DashMap<String, AssetSlot>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` pending. Returns `false` when it is already pending or
    /// fetched, or has failed [`MAX_FETCH_ATTEMPTS`] times.
    pub fn claim(&self, name: &str) -> bool {
        match self.slots.entry(name.to_string()) {
            Entry::Occupied(mut slot) => {
                let retry = match slot.get() {
                    AssetSlot::Failed { attempts, .. } if *attempts < MAX_FETCH_ATTEMPTS => {
                        Some(attempts + 1)
                    }
                    _ => None,
                };
                match retry {
                    Some(attempt) => {
                        slot.insert(AssetSlot::Pending { attempt });
                        true
                    }
                    None => false,
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(AssetSlot::Pending { attempt: 1 });
                true
            }
        }
    }

    pub fn fulfil(&self, handle: AssetHandle) {
        self.slots
            .insert(handle.name.clone(), AssetSlot::Ready(handle));
    }

    pub fn fail(&self, name: &str, reason: String) {
        let mut slot = self
            .slots
            .entry(name.to_string())
            .or_insert(AssetSlot::Pending { attempt: 1 });
        let attempts = match slot.value() {
            AssetSlot::Pending { attempt } => *attempt,
            AssetSlot::Failed { attempts, .. } => *attempts,
            AssetSlot::Ready(_) => 1,
        };
        *slot = AssetSlot::Failed { reason, attempts };
    }

    pub fn get(&self, name: &str) -> Option<AssetSlot> {
        self.slots.get(name).map(|slot| slot.value().clone())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Release every handle.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_claim_lifecycle() {
        let cache = AssetCache::new();
        assert!(cache.claim("a.png"));
        assert!(!cache.claim("a.png"));

        cache.fail("a.png", "timeout".into());
        assert!(cache.claim("a.png"));
        assert!(matches!(
            cache.get("a.png"),
            Some(AssetSlot::Pending { attempt: 2 })
        ));

        cache.fulfil(AssetHandle::new("a.png", None, Bytes::from_static(b"x")));
        assert!(!cache.claim("a.png"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_asset_is_retried_a_bounded_number_of_times() {
        let cache = AssetCache::new();
        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            assert!(cache.claim("gone.png"), "attempt {attempt} should be claimed");
            cache.fail("gone.png", "status 404".into());
        }
        assert!(!cache.claim("gone.png"));
        match cache.get("gone.png") {
            Some(AssetSlot::Failed { attempts, .. }) => assert_eq!(attempts, MAX_FETCH_ATTEMPTS),
            other => panic!("Expected failed asset, got {:?}", other),
        }
    }
}
