//! Outbound request addressing.
//!
//! The push transport cannot carry custom headers, so everything the server
//! needs travels in the connection's URL.

use reqwest::Url;

use crate::credentials::Credentials;
use crate::error::{Error, Result};

/// Parameters of one conversation stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub query: String,
    pub credentials: Credentials,
    /// Ask the server to replay from cache or continue generation.
    pub continuation: bool,
}

impl StreamRequest {
    pub fn new(query: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            query: query.into(),
            credentials,
            continuation: false,
        }
    }

    pub fn continuation(mut self) -> Self {
        self.continuation = true;
        self
    }

    /// Build the connection URL against `endpoint`.
    pub fn to_url(&self, endpoint: &str) -> Result<Url> {
        let mut params = vec![
            ("question", self.query.as_str()),
            ("user_id", self.credentials.user_id.as_str()),
            ("token", self.credentials.token.as_str()),
        ];
        if self.continuation {
            params.push(("continue", "true"));
        }
        Url::parse_with_params(endpoint, &params)
            .map_err(|e| Error::InvalidEndpoint(format!("{endpoint}: {e}")))
    }
}

/// URL of a document feed: `<endpoint>/<document_id>?token=...`.
pub fn document_url(endpoint: &str, document_id: &str, credentials: &Credentials) -> Result<Url> {
    let raw = format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        urlencoding::encode(document_id)
    );
    Url::parse_with_params(&raw, &[("token", credentials.token.as_str())])
        .map_err(|e| Error::InvalidEndpoint(format!("{raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("tok en", "u-1")
    }

    #[test]
    fn test_query_url() {
        let url = StreamRequest::new("what is rust?", creds())
            .to_url("http://localhost:5000/search")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/search?question=what+is+rust%3F&user_id=u-1&token=tok+en"
        );
    }

    #[test]
    fn test_continuation_flag() {
        let url = StreamRequest::new("q", creds())
            .continuation()
            .to_url("http://localhost:5000/search")
            .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("continue".to_string(), "true".to_string())));
        assert!(pairs.contains(&("question".to_string(), "q".to_string())));
    }

    #[test]
    fn test_document_url() {
        let url = document_url("http://localhost:5000/api/todos/content/", "t 1", &creds()).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/todos/content/t%201?token=tok+en"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = StreamRequest::new("q", creds()).to_url("nope").unwrap_err();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }
}
