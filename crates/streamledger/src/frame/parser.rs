//! Stream frame parser.
//!
//! Normalizes both framing styles used by the server into [`FrameEvent`]:
//! named events (`data`, `cache`, `end`, `error`) carrying JSON, and the
//! default channel carrying plain text with `[DONE]`/`[ERROR]` sentinels.

use serde_json::Value;
use thiserror::Error;

use super::types::{DONE_SENTINEL, DataPayload, ERROR_SENTINEL, FrameEvent, RawFrame};

/// Named events that only carry cache/sync diagnostics.
const DIAGNOSTIC_EVENTS: &[&str] = &["cache", "cache_end", "cache_updated", "update", "sync"];

/// Reason reported when an error frame carries no message.
const UNKNOWN_SERVER_ERROR: &str = "server reported an error";

/// A frame that could not be turned into an event. The frame is dropped and
/// the connection stays open.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    /// `data` payload is not the expected JSON record.
    #[error("malformed {event} payload: {reason}")]
    Malformed { event: String, reason: String },

    /// Event name this parser does not know.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Keepalive or other frame with no meaning to the ledger.
    #[error("ignored {0} frame")]
    Ignored(String),
}

impl ParseError {
    /// Whether the drop is worth a warning (ignored frames are routine).
    pub fn is_noteworthy(&self) -> bool {
        !matches!(self, ParseError::Ignored(_))
    }
}

/// Decode one raw frame. Pure function of the frame.
pub fn parse_frame(frame: &RawFrame) -> Result<FrameEvent, ParseError> {
    if frame.is_default_channel() {
        return Ok(parse_default_channel(&frame.data));
    }

    match frame.event.as_str() {
        "data" => parse_data_record(&frame.data),
        "end" => Ok(FrameEvent::End),
        "error" => Ok(FrameEvent::Error(error_reason(&frame.data))),
        "keepalive" | "ping" => Err(ParseError::Ignored(frame.event.clone())),
        name if DIAGNOSTIC_EVENTS.contains(&name) => Ok(FrameEvent::CacheHint {
            event: name.to_string(),
            payload: serde_json::from_str(&frame.data)
                .unwrap_or_else(|_| Value::String(frame.data.clone())),
        }),
        other => Err(ParseError::UnknownEvent(other.to_string())),
    }
}

fn parse_default_channel(data: &str) -> FrameEvent {
    match data {
        DONE_SENTINEL => FrameEvent::End,
        ERROR_SENTINEL => FrameEvent::Error(UNKNOWN_SERVER_ERROR.to_string()),
        text => FrameEvent::Data(DataPayload::text(text)),
    }
}

fn parse_data_record(data: &str) -> Result<FrameEvent, ParseError> {
    let malformed = |reason: String| ParseError::Malformed {
        event: "data".to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(data).map_err(|e| malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(malformed("expected a JSON object".to_string()));
    }
    let payload: DataPayload =
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
    Ok(FrameEvent::Data(payload))
}

/// Error frames carry either `{"message": ...}` or a bare string.
fn error_reason(data: &str) -> String {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return UNKNOWN_SERVER_ERROR.to_string();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN_SERVER_ERROR)
            .to_string(),
        Ok(Value::String(s)) => s,
        _ => trimmed.to_string(),
    }
}
