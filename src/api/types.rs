//! Wire records exchanged with the platform REST API
//!
//! Field names follow the server's JSON exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broadcast lifecycle as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Idle,
    Pushing,
    Ended,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Idle => "idle",
            StreamStatus::Pushing => "pushing",
            StreamStatus::Ended => "ended",
        }
    }
}

impl std::str::FromStr for StreamStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(StreamStatus::Idle),
            "pushing" => Ok(StreamStatus::Pushing),
            "ended" => Ok(StreamStatus::Ended),
            other => Err(format!("unknown stream status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamVisibility {
    #[default]
    Public,
    Private,
}

impl StreamVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamVisibility::Public => "public",
            StreamVisibility::Private => "private",
        }
    }
}

impl std::str::FromStr for StreamVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(StreamVisibility::Public),
            "private" => Ok(StreamVisibility::Private),
            other => Err(format!("unknown visibility: {}", other)),
        }
    }
}

/// Restricted (guest) view of a stream. Never carries the stream key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamView {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub device_id: String,
    pub status: StreamStatus,
    pub visibility: StreamVisibility,
    #[serde(default)]
    pub record_enabled: bool,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub bitrate: u64,
    #[serde(default)]
    pub fps: u32,
    #[serde(default)]
    pub streamer_name: String,
    #[serde(default)]
    pub scheduled_start_time: Option<String>,
    #[serde(default)]
    pub scheduled_end_time: Option<String>,
    #[serde(default)]
    pub actual_start_time: Option<String>,
    #[serde(default)]
    pub actual_end_time: Option<String>,
    #[serde(default)]
    pub current_viewers: u64,
    #[serde(default)]
    pub total_viewers: u64,
    #[serde(default)]
    pub peak_viewers: u64,
}

/// Full operator record, including the sensitive stream key and share-code usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub stream_key: String,
    #[serde(default)]
    pub share_code: Option<String>,
    #[serde(default)]
    pub share_code_max_uses: Option<u32>,
    #[serde(default)]
    pub share_code_used_count: Option<u32>,
    #[serde(flatten)]
    pub view: StreamView,
}

impl Stream {
    /// Whether the share code has reached its usage cap. A cap of zero is unlimited.
    pub fn share_code_exhausted(&self) -> bool {
        usage_exhausted(
            self.share_code_max_uses.unwrap_or(0),
            self.share_code_used_count.unwrap_or(0),
        )
    }
}

/// `max_uses == 0` means unlimited.
pub fn usage_exhausted(max_uses: u32, used_count: u32) -> bool {
    max_uses != 0 && used_count >= max_uses
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamList<T> {
    pub total: u64,
    #[serde(default = "Vec::new")]
    pub streams: Vec<T>,
}

impl<T> Default for StreamList<T> {
    fn default() -> Self {
        Self { total: 0, streams: Vec::new() }
    }
}

pub type StreamViewList = StreamList<StreamView>;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyPasswordRequest<'a> {
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyPasswordResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyShareCodeRequest<'a> {
    pub share_code: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyShareLinkRequest<'a> {
    pub token: &'a str,
}

/// Grant returned by both share-code and share-link verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareGrant {
    pub stream_id: u64,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Body of the application-layer negotiation request
#[derive(Debug, Clone, Serialize)]
pub struct WebRtcOffer<'a> {
    pub sdp: &'a str,
}

/// Error body returned on non-2xx responses: `{error}` from the platform,
/// `{code, msg}` from the negotiation proxy
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}
