//! Guest access authorization
//!
//! Converts a proof of knowledge (password, share code, share link token) into
//! a stream-scoped access token and keeps granted tokens for the session:
//! - `store`: the session-scoped token cache
//! - `resolver`: the three verification protocols

pub mod resolver;
pub mod store;

pub use resolver::{AuthorizationResolver, LandingCredential};
pub use store::AccessTokenStore;

use chrono::{DateTime, Utc};
use std::fmt;

use crate::api::ApiError;

/// Length every share code has; anything else is rejected before a network call
pub const SHARE_CODE_LEN: usize = 8;

/// Stream identifier: numeric id or operator stream key.
///
/// The server resolves either form to the same media source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    Id(u64),
    Key(String),
}

impl StreamId {
    /// Session storage key for this stream's token
    pub fn storage_key(&self) -> String {
        format!("stream_token_{}", self)
    }

    pub fn numeric(&self) -> Option<u64> {
        match self {
            StreamId::Id(id) => Some(*id),
            StreamId::Key(_) => None,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Id(id) => write!(f, "{}", id),
            StreamId::Key(key) => write!(f, "{}", key),
        }
    }
}

impl From<u64> for StreamId {
    fn from(id: u64) -> Self {
        StreamId::Id(id)
    }
}

impl std::str::FromStr for StreamId {
    type Err = std::convert::Infallible;

    /// All-digit selectors are numeric ids, everything else is a stream key
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s.parse::<u64>() {
            Ok(id) => StreamId::Id(id),
            Err(_) => StreamId::Key(s.to_string()),
        })
    }
}

/// Which protocol produced a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuedVia {
    Password,
    ShareCode,
    ShareLink,
    /// Token handed over directly in a landing URL
    LandingUrl,
}

/// Server-issued bearer credential scoped to exactly one stream.
///
/// Never mutated after creation; the store replaces or drops it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    stream_id: StreamId,
    token: String,
    issued_via: IssuedVia,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(
        stream_id: StreamId,
        token: impl Into<String>,
        issued_via: IssuedVia,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            stream_id,
            token: token.into(),
            issued_via,
            expires_at,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Opaque bearer string sent as `access_token`
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_via(&self) -> IssuedVia {
        self.issued_via
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Advisory only: the server remains the source of truth
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Token prefix suitable for log lines
    pub fn redacted(&self) -> String {
        let prefix: String = self.token.chars().take(4).collect();
        format!("{}…", prefix)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("stream_id", &self.stream_id)
            .field("token", &self.redacted())
            .field("issued_via", &self.issued_via)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Proof of knowledge exchanged for an access token, one per attempt
#[derive(Clone, PartialEq, Eq)]
pub enum AccessCredentialProof {
    Password { stream_key: String, password: String },
    ShareCode { code: String },
    ShareLinkToken { token: String },
}

impl AccessCredentialProof {
    pub fn issued_via(&self) -> IssuedVia {
        match self {
            AccessCredentialProof::Password { .. } => IssuedVia::Password,
            AccessCredentialProof::ShareCode { .. } => IssuedVia::ShareCode,
            AccessCredentialProof::ShareLinkToken { .. } => IssuedVia::ShareLink,
        }
    }
}

impl fmt::Debug for AccessCredentialProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessCredentialProof::Password { stream_key, .. } => {
                write!(f, "Password {{ stream_key: {:?} }}", stream_key)
            }
            AccessCredentialProof::ShareCode { .. } => write!(f, "ShareCode"),
            AccessCredentialProof::ShareLinkToken { .. } => write!(f, "ShareLinkToken"),
        }
    }
}

/// Authorization failures surfaced to the initiating flow
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// Wrong password or code, or an expired link
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// Selector resolves to no stream
    #[error("stream not found: {0}")]
    NotFound(String),
    /// Usage cap reached
    #[error("credential exhausted: {0}")]
    Exhausted(String),
    /// Target stream no longer accepts viewers
    #[error("stream ended: {0}")]
    StreamEnded(String),
    /// Network or server error, safe to retry
    #[error("temporary failure: {0}")]
    Transient(String),
}

impl AuthFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthFailure::Transient(_))
    }

    /// Map a REST failure onto the taxonomy for the given protocol.
    ///
    /// 403 vs 404 for share credentials is how the server currently separates
    /// an exhausted code from an unknown one.
    pub(crate) fn from_api(via: IssuedVia, err: ApiError) -> Self {
        let (status, message) = match err {
            ApiError::Status { status, message } => (status, message),
            other => return AuthFailure::Transient(other.to_string()),
        };
        let ended = message.to_ascii_lowercase().contains("ended");
        match (status, via) {
            (410, _) => AuthFailure::StreamEnded(message),
            (403, _) if ended => AuthFailure::StreamEnded(message),
            (404, IssuedVia::Password) => AuthFailure::NotFound(message),
            (403, IssuedVia::ShareCode | IssuedVia::ShareLink) => AuthFailure::Exhausted(message),
            (408 | 429, _) | (500..=599, _) => AuthFailure::Transient(message),
            _ => AuthFailure::InvalidCredential(message),
        }
    }
}
