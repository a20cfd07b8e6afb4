//! Push connection transports.

use futures::channel::mpsc;
use futures::stream::{Stream, StreamExt};
use log::debug;
use reqwest::Url;
use reqwest_eventsource::{Event, EventSource};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::frame::RawFrame;

/// Frames of one open connection, in arrival order. The stream ends when
/// the connection closes; dropping it closes the connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame>> + Send>>;

/// Opens push connections.
pub trait PushTransport: Send + Sync {
    /// Open a connection to `url`. Connecting may happen lazily on first
    /// poll; failures then arrive as an `Err` item.
    fn open(&self, url: &Url) -> Result<FrameStream>;
}

/// SSE transport on `reqwest-eventsource`.
///
/// The built-in retry policy is disabled: reattachment is decided by the
/// lifecycle monitor or the caller, never by the transport.
#[derive(Debug, Clone, Default)]
pub struct EventSourceTransport {
    client: reqwest::Client,
}

impl EventSourceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl PushTransport for EventSourceTransport {
    fn open(&self, url: &Url) -> Result<FrameStream> {
        debug!("Opening SSE connection to {}", redact_token(url));
        let request = self
            .client
            .get(url.clone())
            .header("Accept", "text/event-stream");
        let mut es = EventSource::new(request).map_err(|e| Error::Transport(e.to_string()))?;
        es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let frames = es.filter_map(|event| futures::future::ready(translate_event(event)));
        Ok(Box::pin(frames))
    }
}

fn translate_event(
    event: std::result::Result<Event, reqwest_eventsource::Error>,
) -> Option<Result<RawFrame>> {
    match event {
        Ok(Event::Open) => None,
        Ok(Event::Message(msg)) => Some(Ok(RawFrame::new(msg.event, msg.data))),
        // Clean close: the controller decides whether it came too early.
        Err(reqwest_eventsource::Error::StreamEnded) => None,
        Err(reqwest_eventsource::Error::InvalidStatusCode(status, _)) => {
            Some(Err(Error::Transport(format!("unexpected status {status}"))))
        }
        Err(e) => Some(Err(Error::Transport(e.to_string()))),
    }
}

/// Log-safe rendering of a connection URL.
pub(crate) fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted.to_string()
}

type ChannelItem = Result<RawFrame>;

/// In-process transport fed through channels.
///
/// Each call to [`ChannelTransport::prepare`] queues one connection; the
/// next `open` takes it. Useful for embedding a different wire (or a test
/// script) behind the controller.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<ChannelItem>>>,
    opened: Mutex<Vec<Url>>,
}

/// Sending half of a prepared connection. Dropping it closes the stream.
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<ChannelItem>,
}

impl ChannelConnection {
    /// Deliver a frame. Returns `false` once the reader has gone away.
    pub fn send(&self, frame: RawFrame) -> bool {
        self.tx.unbounded_send(Ok(frame)).is_ok()
    }

    /// Deliver a transport failure.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx
            .unbounded_send(Err(Error::Transport(reason.into())))
            .is_ok()
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        self.tx.close_channel();
    }

    /// Whether the reader dropped the connection.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a connection for the next `open`.
    pub fn prepare(&self) -> ChannelConnection {
        let (tx, rx) = mpsc::unbounded();
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(rx);
        }
        ChannelConnection { tx }
    }

    /// URLs opened so far, oldest first.
    pub fn opened(&self) -> Vec<Url> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl PushTransport for ChannelTransport {
    fn open(&self, url: &Url) -> Result<FrameStream> {
        let rx = self
            .pending
            .lock()
            .map_err(|_| Error::Transport("channel transport lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| Error::Transport("connection refused".to_string()))?;
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(url.clone());
        }
        Ok(Box::pin(rx))
    }
}
