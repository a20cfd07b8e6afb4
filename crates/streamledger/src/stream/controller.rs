//! Stream session controller.
//!
//! Owns the single push connection of a session and applies its frames to
//! the ledger, one at a time, in arrival order.

use futures::StreamExt;
use log::{debug, info, warn};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;

use super::request::{StreamRequest, document_url};
use super::transport::{FrameStream, PushTransport, redact_token};
use crate::assets::asset_name;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::frame::{DataPayload, FrameEvent, ParseError, parse_frame};
use crate::ledger::{Item, ItemLedger};

/// Controller state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed { reason: String },
}

impl StreamState {
    /// Whether a connection is open (or being opened).
    pub fn is_open(&self) -> bool {
        matches!(self, StreamState::Connecting | StreamState::Streaming)
    }
}

/// What one applied frame did.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStep {
    /// Text appended to the target item (`applied == false` when the item
    /// was already completed and the frame was ignored).
    Delta {
        item_id: String,
        applied: bool,
        assets: Vec<String>,
    },
    /// Document record upserted by id.
    Record {
        item_id: String,
        inserted: bool,
        assets: Vec<String>,
    },
    /// Diagnostic frame, no ledger change.
    Hint { event: String },
    /// Frame could not be parsed and was dropped.
    Dropped(ParseError),
    /// End signal; the connection is closed.
    Completed { item_id: Option<String> },
}

impl StreamStep {
    /// Whether this step changed the ledger.
    pub fn mutated_ledger(&self) -> bool {
        match self {
            StreamStep::Delta { applied, assets, .. } => *applied || !assets.is_empty(),
            StreamStep::Record { inserted, .. } => *inserted,
            StreamStep::Completed { item_id } => item_id.is_some(),
            StreamStep::Hint { .. } | StreamStep::Dropped(_) => false,
        }
    }

    /// Asset names referenced by this step.
    pub fn assets(&self) -> &[String] {
        match self {
            StreamStep::Delta { assets, .. } | StreamStep::Record { assets, .. } => assets,
            _ => &[],
        }
    }
}

/// Where frames of the open connection go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Deltas append to this produced item.
    Item(String),
    /// Records are upserted by their own ids.
    Feed { document_id: String },
}

struct Connection {
    frames: FrameStream,
    target: Target,
}

/// Endpoints the controller connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    pub stream: String,
    pub document: String,
}

/// Drives one logical stream: `Idle → Connecting → Streaming → Completed`,
/// or `→ Failed`.
pub struct StreamController {
    session_id: String,
    transport: Arc<dyn PushTransport>,
    endpoints: StreamEndpoints,
    state: StreamState,
    connection: Option<Connection>,
}

impl StreamController {
    pub fn new(
        session_id: impl Into<String>,
        transport: Arc<dyn PushTransport>,
        endpoints: StreamEndpoints,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            transport,
            endpoints,
            state: StreamState::Idle,
            connection: None,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Id of the item the open connection appends to.
    pub fn target_item(&self) -> Option<&str> {
        match self.connection.as_ref().map(|c| &c.target) {
            Some(Target::Item(id)) => Some(id),
            _ => None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Start a new query. Creates the produced tail item before the request
    /// is issued; if opening fails the item stays incomplete.
    pub fn start(
        &mut self,
        ledger: &mut ItemLedger,
        query: &str,
        credentials: &Credentials,
    ) -> Result<Item> {
        self.ensure_settled("start")?;
        let url = StreamRequest::new(query, credentials.clone()).to_url(&self.endpoints.stream)?;
        let item = ledger.begin_produced()?;
        info!(
            "Starting stream for session {} into item {}",
            self.session_id, item.id
        );
        self.connect(url, Target::Item(item.id.clone()))?;
        Ok(item)
    }

    /// Reattach to the incomplete tail item with the continuation flag and
    /// the original query. Subsequent deltas append to the same item.
    pub fn resume(
        &mut self,
        ledger: &ItemLedger,
        last_user_item: &Item,
        credentials: &Credentials,
    ) -> Result<Item> {
        self.ensure_settled("resume")?;
        let tail = ledger.incomplete_tail().ok_or(Error::NothingToResume)?.clone();
        let url = StreamRequest::new(last_user_item.content.clone(), credentials.clone())
            .continuation()
            .to_url(&self.endpoints.stream)?;
        info!(
            "Resuming stream for session {} into item {} ({} chars so far)",
            self.session_id,
            tail.id,
            tail.content.len()
        );
        self.connect(url, Target::Item(tail.id.clone()))?;
        Ok(tail)
    }

    /// Open a document feed whose records are upserted by id.
    pub fn open_feed(&mut self, document_id: &str, credentials: &Credentials) -> Result<()> {
        self.ensure_settled("open feed")?;
        let url = document_url(&self.endpoints.document, document_id, credentials)?;
        info!(
            "Opening document feed {} for session {}",
            document_id, self.session_id
        );
        self.connect(
            url,
            Target::Feed {
                document_id: document_id.to_string(),
            },
        )
    }

    /// Close the connection. Idempotent; the tail item keeps its
    /// completion flag so an aborted item can be resumed later.
    pub fn stop(&mut self) {
        if self.connection.take().is_some() {
            info!("Stopped stream for session {}", self.session_id);
        }
        if self.state.is_open() {
            self.state = StreamState::Idle;
        }
    }

    /// Read one frame from the open connection and apply it to `ledger`.
    ///
    /// Returns `None` when no connection is open. Errors close the
    /// connection and leave the target item incomplete.
    pub async fn next_step(&mut self, ledger: &mut ItemLedger) -> Option<Result<StreamStep>> {
        let connection = self.connection.as_mut()?;
        let next = connection.frames.next().await;
        let target = connection.target.clone();

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Some(Err(self.fail(e))),
            None => {
                return Some(Err(self.fail(Error::Transport(
                    "connection closed before end signal".to_string(),
                ))));
            }
        };

        if self.state == StreamState::Connecting {
            self.state = StreamState::Streaming;
        }

        let event = match parse_frame(&frame) {
            Ok(event) => event,
            Err(e) => {
                if e.is_noteworthy() {
                    warn!("Dropping frame for session {}: {}", self.session_id, e);
                } else {
                    debug!("Dropping frame for session {}: {}", self.session_id, e);
                }
                return Some(Ok(StreamStep::Dropped(e)));
            }
        };

        Some(self.apply(ledger, target, event))
    }

    fn apply(
        &mut self,
        ledger: &mut ItemLedger,
        target: Target,
        event: FrameEvent,
    ) -> Result<StreamStep> {
        match event {
            FrameEvent::Data(payload) => match target {
                Target::Item(item_id) => self.apply_delta(ledger, item_id, payload),
                Target::Feed { document_id } => self.apply_record(ledger, &document_id, payload),
            },
            FrameEvent::CacheHint { event, payload } => {
                debug!(
                    "Cache hint '{}' for session {}: {}",
                    event, self.session_id, payload
                );
                Ok(StreamStep::Hint { event })
            }
            FrameEvent::End => {
                let item_id = match target {
                    Target::Item(item_id) => {
                        ledger.mark_completed(&item_id)?;
                        Some(item_id)
                    }
                    Target::Feed { .. } => None,
                };
                self.connection = None;
                self.state = StreamState::Completed;
                info!("Stream for session {} completed", self.session_id);
                Ok(StreamStep::Completed { item_id })
            }
            FrameEvent::Error(reason) => Err(self.fail(Error::ServerSignaled(reason))),
        }
    }

    fn apply_delta(
        &mut self,
        ledger: &mut ItemLedger,
        item_id: String,
        payload: DataPayload,
    ) -> Result<StreamStep> {
        let assets: Vec<String> = payload.assets.iter().map(|a| asset_name(a)).collect();
        let applied = match ledger.apply_delta(&item_id, &payload.delta) {
            Ok(applied) => applied,
            Err(e) => return Err(self.fail(e)),
        };
        if !assets.is_empty() {
            ledger.record_assets(&item_id, &assets)?;
        }
        Ok(StreamStep::Delta {
            item_id,
            applied,
            assets,
        })
    }

    fn apply_record(
        &mut self,
        ledger: &mut ItemLedger,
        document_id: &str,
        payload: DataPayload,
    ) -> Result<StreamStep> {
        let Some(record_id) = payload.id else {
            let dropped = ParseError::Malformed {
                event: "data".to_string(),
                reason: "record without id".to_string(),
            };
            warn!(
                "Dropping record of document {} for session {}: {}",
                document_id, self.session_id, dropped
            );
            return Ok(StreamStep::Dropped(dropped));
        };
        let assets: Vec<String> = payload.assets.iter().map(|a| asset_name(a)).collect();
        let mut item = Item::delivered(record_id.clone(), payload.delta);
        item.assets = assets.clone();
        let inserted = ledger.upsert_by_id(item)?;
        if !inserted {
            debug!("Record {} already in ledger, skipped", record_id);
        }
        Ok(StreamStep::Record {
            item_id: record_id,
            inserted,
            assets,
        })
    }

    fn ensure_settled(&self, action: &str) -> Result<()> {
        if self.state.is_open() {
            return Err(Error::Busy(format!(
                "cannot {action} while {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn connect(&mut self, url: Url, target: Target) -> Result<()> {
        debug!(
            "Connecting session {} to {}",
            self.session_id,
            redact_token(&url)
        );
        match self.transport.open(&url) {
            Ok(frames) => {
                self.connection = Some(Connection { frames, target });
                self.state = StreamState::Connecting;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Close the connection and enter `Failed`.
    fn fail(&mut self, error: Error) -> Error {
        warn!("Stream for session {} failed: {}", self.session_id, error);
        self.connection = None;
        self.state = StreamState::Failed {
            reason: error.to_string(),
        };
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use crate::stream::transport::ChannelTransport;

    fn endpoints() -> StreamEndpoints {
        StreamEndpoints {
            stream: "http://localhost:5000/search".to_string(),
            document: "http://localhost:5000/api/todos/content".to_string(),
        }
    }

    fn creds() -> Credentials {
        Credentials::new("tok", "u-1")
    }

    fn controller() -> (StreamController, Arc<ChannelTransport>) {
        let transport = Arc::new(ChannelTransport::new());
        let controller = StreamController::new("s-1", transport.clone(), endpoints());
        (controller, transport)
    }

    #[tokio::test]
    async fn test_deltas_then_end() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        ledger.append_user("hello");
        let conn = transport.prepare();

        let item = controller.start(&mut ledger, "hello", &creds()).unwrap();
        assert_eq!(controller.state(), &StreamState::Connecting);
        assert!(ledger.get(&item.id).unwrap().is_in_flight());

        for delta in ["H", "i", "!"] {
            conn.send(RawFrame::message(delta));
        }
        for _ in 0..3 {
            let step = controller.next_step(&mut ledger).await.unwrap().unwrap();
            assert!(step.mutated_ledger());
        }
        assert_eq!(controller.state(), &StreamState::Streaming);
        assert_eq!(ledger.get(&item.id).unwrap().content, "Hi!");
        assert!(!ledger.get(&item.id).unwrap().completed);

        conn.send(RawFrame::new("end", ""));
        let step = controller.next_step(&mut ledger).await.unwrap().unwrap();
        assert_eq!(
            step,
            StreamStep::Completed {
                item_id: Some(item.id.clone())
            }
        );
        assert!(ledger.get(&item.id).unwrap().completed);
        assert_eq!(controller.state(), &StreamState::Completed);
        assert!(controller.next_step(&mut ledger).await.is_none());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_item_incomplete_then_resume() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let user = ledger.append_user("question");
        let first = transport.prepare();

        let item = controller.start(&mut ledger, "question", &creds()).unwrap();
        first.send(RawFrame::message("partial"));
        controller.next_step(&mut ledger).await.unwrap().unwrap();
        first.fail("connection reset");

        let err = controller.next_step(&mut ledger).await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(controller.state(), StreamState::Failed { .. }));
        assert!(!ledger.get(&item.id).unwrap().completed);

        let second = transport.prepare();
        let resumed = controller.resume(&ledger, &user, &creds()).unwrap();
        assert_eq!(resumed.id, item.id);
        second.send(RawFrame::message(" and more"));
        second.send(RawFrame::message("[DONE]"));
        controller.next_step(&mut ledger).await.unwrap().unwrap();
        controller.next_step(&mut ledger).await.unwrap().unwrap();

        let done = ledger.get(&item.id).unwrap();
        assert_eq!(done.content, "partial and more");
        assert!(done.completed);
        assert_eq!(ledger.len(), 2);

        let urls = transport.opened();
        assert_eq!(urls.len(), 2);
        assert!(!urls[0].query().unwrap().contains("continue=true"));
        assert!(urls[1].query().unwrap().contains("continue=true"));
        assert!(urls[1].query().unwrap().contains("question=question"));
    }

    #[tokio::test]
    async fn test_server_error_frame() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let conn = transport.prepare();
        let item = controller.start(&mut ledger, "q", &creds()).unwrap();

        conn.send(RawFrame::message("[ERROR]"));
        let err = controller.next_step(&mut ledger).await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ServerSignaled(_)));
        assert!(conn.is_closed());
        assert!(ledger.get(&item.id).unwrap().is_in_flight());
    }

    #[tokio::test]
    async fn test_close_without_end_is_transport_error() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let conn = transport.prepare();
        controller.start(&mut ledger, "q", &creds()).unwrap();
        conn.close();

        let err = controller.next_step(&mut ledger).await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_and_stream_continues() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let conn = transport.prepare();
        let item = controller.start(&mut ledger, "q", &creds()).unwrap();

        conn.send(RawFrame::new("data", "{broken"));
        conn.send(RawFrame::new("data", r#"{"delta":"ok"}"#));
        let step = controller.next_step(&mut ledger).await.unwrap().unwrap();
        let reported = step.clone();
        match reported {
            StreamStep::Dropped(ParseError::Malformed { event, .. }) => assert_eq!(event, "data"),
            other => panic!("Expected Dropped, got {:?}", other),
        }
        assert_eq!(step.clone(), step);
        assert!(!step.mutated_ledger());
        controller.next_step(&mut ledger).await.unwrap().unwrap();

        assert_eq!(ledger.get(&item.id).unwrap().content, "ok");
        assert_eq!(controller.state(), &StreamState::Streaming);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_no_frames_after_close() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let conn = transport.prepare();
        let item = controller.start(&mut ledger, "q", &creds()).unwrap();

        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), &StreamState::Idle);
        assert!(!conn.send(RawFrame::message("late")));
        assert!(controller.next_step(&mut ledger).await.is_none());
        assert_eq!(ledger.get(&item.id).unwrap().content, "");
        assert!(!ledger.get(&item.id).unwrap().completed);
    }

    #[tokio::test]
    async fn test_busy_guards() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let user = ledger.append_user("q");
        let _conn = transport.prepare();
        controller.start(&mut ledger, "q", &creds()).unwrap();

        let err = controller.start(&mut ledger, "q2", &creds()).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        let err = controller.resume(&ledger, &user, &creds()).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_requires_incomplete_tail() {
        let (mut controller, _transport) = controller();
        let mut ledger = ItemLedger::new();
        let user = ledger.append_user("q");
        let err = controller.resume(&ledger, &user, &creds()).unwrap_err();
        assert!(matches!(err, Error::NothingToResume));
    }

    #[tokio::test]
    async fn test_refused_connection_fails_and_keeps_item() {
        let (mut controller, _transport) = controller();
        let mut ledger = ItemLedger::new();
        let err = controller.start(&mut ledger, "q", &creds()).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(matches!(controller.state(), StreamState::Failed { .. }));
        assert!(ledger.incomplete_tail().is_some());
    }

    #[tokio::test]
    async fn test_document_feed_upserts_by_id() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let conn = transport.prepare();
        controller.open_feed("todo-1", &creds()).unwrap();

        conn.send(RawFrame::new("cache", r#"{"hit": true, "count": 2}"#));
        conn.send(RawFrame::new(
            "data",
            r#"{"_id": "c1", "content": "one", "images": ["/img/a.png"]}"#,
        ));
        conn.send(RawFrame::new("data", r#"{"_id": "c1", "content": "one again"}"#));
        conn.send(RawFrame::new("data", r#"{"content": "no id"}"#));
        conn.send(RawFrame::new("end", r#"{"message": "DONE", "total": 1}"#));

        let mut steps = Vec::new();
        while let Some(step) = controller.next_step(&mut ledger).await {
            steps.push(step.unwrap());
        }

        assert_eq!(steps[0], StreamStep::Hint { event: "cache".to_string() });
        assert_eq!(steps[1].assets(), &["a.png".to_string()]);
        assert!(matches!(steps[2], StreamStep::Record { inserted: false, .. }));
        assert!(matches!(steps[3], StreamStep::Dropped(_)));
        assert_eq!(steps[4], StreamStep::Completed { item_id: None });

        assert_eq!(ledger.len(), 1);
        let record = ledger.get("c1").unwrap();
        assert_eq!(record.content, "one");
        assert!(record.completed);
        assert_eq!(record.assets, vec!["a.png"]);
        assert!(transport.opened()[0].as_str().contains("/api/todos/content/todo-1?token=tok"));
    }

    #[tokio::test]
    async fn test_late_frame_for_completed_item_is_ignored() {
        let (mut controller, transport) = controller();
        let mut ledger = ItemLedger::new();
        let conn = transport.prepare();
        let item = controller.start(&mut ledger, "q", &creds()).unwrap();
        ledger.apply_delta(&item.id, "x").unwrap();
        ledger.mark_completed(&item.id).unwrap();

        conn.send(RawFrame::message("dup"));
        let step = controller.next_step(&mut ledger).await.unwrap().unwrap();
        assert!(matches!(step, StreamStep::Delta { applied: false, .. }));
        assert_eq!(ledger.get(&item.id).unwrap().content, "x");
    }
}
