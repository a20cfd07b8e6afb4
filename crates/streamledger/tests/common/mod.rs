//! Test utilities: an in-process SSE server.
#![allow(dead_code)]

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::get,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use streamledger::config::EngineConfig;
use streamledger::{Credentials, StaticCredentials};

pub const GOOD_TOKEN: &str = "good-token";
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// Query parameters of every `/search` request, oldest first.
#[derive(Clone, Default)]
pub struct Recorded {
    requests: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl Recorded {
    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }
}

pub struct TestServer {
    pub base_url: String,
    pub recorded: Recorded,
}

impl TestServer {
    /// Engine config pointing at this server.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.stream.endpoint = format!("{}/search", self.base_url);
        config.stream.document_endpoint = format!("{}/api/todos/content", self.base_url);
        config.assets.endpoint = format!("{}/api/todos/content/image", self.base_url);
        config
    }
}

pub fn credentials() -> Arc<StaticCredentials> {
    Arc::new(StaticCredentials::new(Credentials::new(GOOD_TOKEN, "u-1")))
}

/// Start the server on an ephemeral port.
pub async fn spawn_server() -> TestServer {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/search", get(search))
        .route("/api/todos/content/image/{name}", get(image))
        .route("/api/todos/content/{id}", get(document))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        recorded,
    }
}

fn sse(events: Vec<Event>) -> Response {
    let stream = tokio_stream::iter(events.into_iter().map(Ok::<_, Infallible>));
    Sse::new(stream).into_response()
}

/// Conversation stream on the default channel.
///
/// `question=drop` sends a fragment and closes without an end signal;
/// a continuation request finishes the answer.
async fn search(
    State(recorded): State<Recorded>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    recorded.requests.lock().unwrap().push(params.clone());
    if params.get("token").map(String::as_str) != Some(GOOD_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let continuation = params.get("continue").map(String::as_str) == Some("true");
    let question = params.get("question").cloned().unwrap_or_default();
    let events = match (question.as_str(), continuation) {
        (_, true) => vec![
            Event::default().data("-resumed"),
            Event::default().data("[DONE]"),
        ],
        ("drop", false) => vec![Event::default().data("partial")],
        ("fail", false) => vec![
            Event::default().data("x"),
            Event::default()
                .event("error")
                .data(r#"{"message": "model overloaded"}"#),
        ],
        _ => vec![
            Event::default().data("H"),
            Event::default().data("i"),
            Event::default().data("!"),
            Event::default().data("[DONE]"),
        ],
    };
    sse(events)
}

/// Document feed with named events, a redelivered record and an asset.
async fn document(
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("token").map(String::as_str) != Some(GOOD_TOKEN) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let first = format!(
        r#"{{"_id": "{id}-1", "content": "first", "images": ["/uploads/u-1/chart.png"]}}"#
    );
    let second = format!(r#"{{"_id": "{id}-2", "content": "second"}}"#);
    sse(vec![
        Event::default().event("cache").data(r#"{"hit": false}"#),
        Event::default().event("data").data(first.clone()),
        Event::default().event("data").data(second),
        Event::default().event("data").data(first),
        Event::default().event("keepalive").data(""),
        Event::default().event("cache_updated").data(r#"{"count": 2}"#),
        Event::default().event("end").data(r#"{"message": "DONE"}"#),
    ])
}

async fn image(Path(name): Path<String>, headers: HeaderMap) -> Response {
    let expected = format!("Bearer {GOOD_TOKEN}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if name != "chart.png" {
        return StatusCode::NOT_FOUND.into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES).into_response()
}
