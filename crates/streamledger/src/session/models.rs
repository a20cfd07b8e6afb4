//! Session key layout and snapshot model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ledger::Item;

/// Un-namespaced key holding the id of the current session.
pub const CURRENT_SESSION_KEY: &str = "current_session_id";

/// Store keys for one session, namespaced by session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub history: String,
    pub stage: String,
    pub last_active: String,
    pub last_mounted: String,
}

impl SessionKeys {
    pub fn for_session(session_id: &str) -> Self {
        Self {
            history: format!("history_{session_id}"),
            stage: format!("stage_{session_id}"),
            last_active: format!("last_active_{session_id}"),
            last_mounted: format!("last_mounted_{session_id}"),
        }
    }
}

/// Point-in-time view of a persisted session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub stage: u32,
    pub last_active_at: Option<DateTime<Utc>>,
    pub history: Vec<Item>,
}
