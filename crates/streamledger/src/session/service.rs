//! Session persistence.
//!
//! All reads and writes of the durable store go through [`Session`]. Values
//! are stored as strings: JSON for history, decimal integers for the stage
//! and millisecond Unix timestamps for activity times.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use uuid::Uuid;

use super::models::{CURRENT_SESSION_KEY, SessionKeys, SessionSnapshot};
use crate::error::Result;
use crate::ledger::{Item, StoredItem};
use crate::storage::SessionStore;

/// One logical conversation bound to a durable store.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    session_id: String,
    keys: SessionKeys,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open the current session of this store scope, creating one if the
    /// scope has none yet.
    pub fn open(store: Arc<dyn SessionStore>) -> Result<Self> {
        let session_id = match store.get(CURRENT_SESSION_KEY)? {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                let id = format!("session_{}", Uuid::new_v4().simple());
                store.set(CURRENT_SESSION_KEY, &id)?;
                info!("Created session {}", id);
                id
            }
        };
        Ok(Self::with_id(store, session_id))
    }

    /// Bind to an explicit session id.
    pub fn with_id(store: Arc<dyn SessionStore>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let keys = SessionKeys::for_session(&session_id);
        Self {
            store,
            session_id,
            keys,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Load persisted history. Unreadable history is logged and treated as
    /// empty rather than failing the mount.
    pub fn load_history(&self) -> Result<Vec<Item>> {
        let Some(raw) = self.store.get(&self.keys.history)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<StoredItem>>(&raw) {
            Ok(stored) => Ok(stored.into_iter().map(Item::from).collect()),
            Err(e) => {
                warn!(
                    "Discarding unreadable history for session {}: {}",
                    self.session_id, e
                );
                Ok(Vec::new())
            }
        }
    }

    /// Persist a whole-history snapshot.
    pub fn save_history(&self, items: &[Item]) -> Result<()> {
        let json = serde_json::to_string(items)?;
        self.store.set(&self.keys.history, &json)?;
        debug!(
            "Persisted {} items for session {}",
            items.len(),
            self.session_id
        );
        Ok(())
    }

    pub fn stage(&self) -> Result<u32> {
        let Some(raw) = self.store.get(&self.keys.stage)? else {
            return Ok(0);
        };
        Ok(raw.trim().parse().unwrap_or_else(|_| {
            warn!(
                "Invalid stage {:?} for session {}, using 0",
                raw, self.session_id
            );
            0
        }))
    }

    pub fn set_stage(&self, stage: u32) -> Result<()> {
        self.store.set(&self.keys.stage, &stage.to_string())?;
        Ok(())
    }

    pub fn last_active_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.read_timestamp(&self.keys.last_active)
    }

    pub fn set_last_active_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.write_timestamp(&self.keys.last_active, at)
    }

    /// Record a mount. Returns the previous mount time, which is present
    /// when this mount is a reload of an already-open session.
    pub fn mark_mounted(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let previous = self.read_timestamp(&self.keys.last_mounted)?;
        self.write_timestamp(&self.keys.last_mounted, now)?;
        Ok(previous)
    }

    /// Forget history, stage and last activity. The session id is kept.
    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.keys.history)?;
        self.store.remove(&self.keys.stage)?;
        self.store.remove(&self.keys.last_active)?;
        info!("Cleared session {}", self.session_id);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot> {
        Ok(SessionSnapshot {
            session_id: self.session_id.clone(),
            stage: self.stage()?,
            last_active_at: self.last_active_at()?,
            history: self.load_history()?,
        })
    }

    fn read_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        let parsed = raw
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
        if parsed.is_none() {
            warn!("Ignoring invalid timestamp {:?} under {}", raw, key);
        }
        Ok(parsed)
    }

    fn write_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.store.set(key, &at.timestamp_millis().to_string())?;
        Ok(())
    }
}
