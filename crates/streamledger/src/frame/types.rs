//! Frame types shared by the parser and the controller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used by SSE when a frame carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Default-channel sentinel marking the end of the produced item.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Default-channel sentinel marking a server-side failure.
pub const ERROR_SENTINEL: &str = "[ERROR]";

/// One frame as received from the push connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Event name (`message` for the default channel).
    pub event: String,
    /// Frame payload, multi-line `data:` fields already joined.
    pub data: String,
}

impl RawFrame {
    /// Create a frame with an explicit event name.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Create a frame on the default channel.
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_EVENT, data)
    }

    /// Whether this frame arrived on the unnamed/default channel.
    pub fn is_default_channel(&self) -> bool {
        self.event.is_empty() || self.event == DEFAULT_EVENT
    }
}

/// Structured payload of a `data` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPayload {
    /// Item correlation id, when the server provides one.
    #[serde(default, alias = "_id", alias = "item_id")]
    pub id: Option<String>,
    /// Incremental text fragment.
    #[serde(default, alias = "text", alias = "content")]
    pub delta: String,
    /// Referenced binary assets, by name or path.
    #[serde(default, alias = "images")]
    pub assets: Vec<String>,
}

impl DataPayload {
    /// Payload carrying only a text fragment.
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Self::default()
        }
    }
}

/// Normalized event produced from one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Content to apply to the target item.
    Data(DataPayload),
    /// Diagnostic record; never mutates the ledger.
    CacheHint { event: String, payload: Value },
    /// The target item is complete.
    End,
    /// Terminal for the current attempt; the item stays incomplete.
    Error(String),
}
