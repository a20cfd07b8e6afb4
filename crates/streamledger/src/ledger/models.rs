//! Ledger item models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authored by the local user.
    User,
    /// Produced by the far end, possibly still streaming.
    #[serde(alias = "ai", alias = "assistant")]
    Produced,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Produced => write!(f, "produced"),
        }
    }
}

/// One unit of conversation/document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    /// Asset names referenced by this item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
}

impl Item {
    /// A completed user item with a fresh id.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: new_item_id(),
            role: Role::User,
            content: content.into(),
            completed: true,
            created_at: Utc::now(),
            assets: Vec::new(),
        }
    }

    /// An empty, incomplete produced item with a fresh id.
    pub fn produced() -> Self {
        Self {
            id: new_item_id(),
            role: Role::Produced,
            content: String::new(),
            completed: false,
            created_at: Utc::now(),
            assets: Vec::new(),
        }
    }

    /// A produced item delivered whole under a server-assigned id.
    pub fn delivered(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Produced,
            content: content.into(),
            completed: true,
            created_at: Utc::now(),
            assets: Vec::new(),
        }
    }

    /// Whether this is a produced item still waiting for its end signal.
    pub fn is_in_flight(&self) -> bool {
        self.role == Role::Produced && !self.completed
    }
}

/// Item as found in persisted history.
///
/// Older snapshots carry no completion flag; produced items without one are
/// treated as completed.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(alias = "type")]
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "isCompleted")]
    pub completed: Option<bool>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<String>,
}

impl From<StoredItem> for Item {
    fn from(stored: StoredItem) -> Self {
        let completed = match stored.role {
            Role::User => true,
            Role::Produced => stored.completed.unwrap_or(true),
        };
        Self {
            id: stored.id,
            role: stored.role,
            content: stored.content,
            completed,
            created_at: stored.created_at.unwrap_or_else(Utc::now),
            assets: stored.assets,
        }
    }
}

/// Legacy snapshots used numeric millisecond ids.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// Generate a client-side item id.
pub fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}
