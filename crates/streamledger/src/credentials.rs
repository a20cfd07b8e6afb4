//! Current-credential provider.
//!
//! The push transport cannot carry custom headers, so the token and user id
//! travel as query parameters. Renewal and storage of credentials are the
//! provider's business; the engine only asks for the current pair.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use log::debug;
use serde::Deserialize;
use std::sync::RwLock;

/// Identity token plus the user id it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub user_id: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Source of the current credentials.
pub trait CredentialProvider: Send + Sync {
    /// Current token and user id, or `None` when signed out.
    fn current_credentials(&self) -> Option<Credentials>;
}

/// Fixed credentials that can be swapped or cleared at runtime.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    current: RwLock<Option<Credentials>>,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            current: RwLock::new(Some(credentials)),
        }
    }

    /// Provider with no credentials.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn replace(&self, credentials: Option<Credentials>) {
        if let Ok(mut current) = self.current.write() {
            *current = credentials;
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn current_credentials(&self) -> Option<Credentials> {
        self.current.read().ok().and_then(|c| c.clone())
    }
}

/// Claims read from the token payload.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

/// Credentials derived from a bearer token.
///
/// The user id is read from the token's `user_id` claim (then `sub`),
/// falling back to a known user id. The signature is not verified: the
/// server does that, the client only needs the id to address the stream.
#[derive(Debug, Clone)]
pub struct TokenCredentials {
    token: Option<String>,
    fallback_user_id: Option<String>,
}

impl TokenCredentials {
    pub fn new(token: Option<String>, fallback_user_id: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            fallback_user_id: fallback_user_id.filter(|u| !u.trim().is_empty()),
        }
    }
}

impl CredentialProvider for TokenCredentials {
    fn current_credentials(&self) -> Option<Credentials> {
        let token = self.token.as_ref()?;
        let user_id = user_id_from_token(token).or_else(|| self.fallback_user_id.clone())?;
        Some(Credentials::new(token.clone(), user_id))
    }
}

/// Extract the user id from an unverified JWT payload.
pub fn user_id_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Token payload is not base64url: {}", e);
            return None;
        }
    };
    let claims: TokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims
        .user_id
        .or(claims.sub)
        .filter(|id| !id.trim().is_empty())
}
