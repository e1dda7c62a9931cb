//! Configuration management for easystream-viewer

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which negotiation endpoint a playback session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationMode {
    /// Application-layer proxy, `POST /streams/webrtc/{id}`, authorised by access token
    #[default]
    Proxy,
    /// Direct edge-server endpoint, addressed by the stream key (operator only)
    Edge,
}

impl NegotiationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationMode::Proxy => "proxy",
            NegotiationMode::Edge => "edge",
        }
    }
}

impl std::str::FromStr for NegotiationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(NegotiationMode::Proxy),
            "edge" => Ok(NegotiationMode::Edge),
            other => Err(format!("unknown negotiation mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Platform REST API
    #[serde(default)]
    pub api: ApiConfig,

    /// Direct edge media server
    #[serde(default)]
    pub edge: EdgeConfig,

    /// Playback negotiation
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every API path is appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How often a followed listing is re-fetched
    #[serde(default = "default_list_refresh_ms")]
    pub list_refresh_ms: u64,

    /// How often a followed detail is re-fetched while a guest token is held
    #[serde(default = "default_detail_refresh_ms")]
    pub detail_refresh_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            list_refresh_ms: default_list_refresh_ms(),
            detail_refresh_ms: default_detail_refresh_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default = "default_edge_host")]
    pub host: String,

    #[serde(default = "default_edge_port")]
    pub port: u16,

    /// Application name the edge server files streams under
    #[serde(default = "default_edge_app")]
    pub app: String,

    #[serde(default)]
    pub use_ssl: bool,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            host: default_edge_host(),
            port: default_edge_port(),
            app: default_edge_app(),
            use_ssl: false,
        }
    }
}

impl EdgeConfig {
    /// Play negotiation URL for a stream's internal name. Query values are percent-encoded.
    pub fn negotiation_url(&self, stream_key: &str) -> Result<Url, String> {
        let scheme = if self.use_ssl { "https" } else { "http" };
        let mut url = Url::parse(&format!("{}://{}:{}/index/api/webrtc", scheme, self.host, self.port))
            .map_err(|e| format!("invalid edge address {}:{}: {}", self.host, self.port, e))?;
        url.query_pairs_mut()
            .append_pair("app", &self.app)
            .append_pair("stream", stream_key)
            .append_pair("type", "play");
        Ok(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub mode: NegotiationMode,

    /// Start negotiating as soon as a stream is selected
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,

    /// Pause between stop and start when retrying
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound on waiting for ICE gathering to complete
    #[serde(default = "default_gather_timeout_ms")]
    pub gather_timeout_ms: u64,

    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mode: NegotiationMode::Proxy,
            autoplay: default_autoplay(),
            retry_delay_ms: default_retry_delay_ms(),
            gather_timeout_ms: default_gather_timeout_ms(),
            ice_servers: default_ice_servers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err("API base_url must be an absolute http(s) URL".into());
        }

        if self.api.timeout_ms == 0 {
            return Err("API timeout must be non-zero".into());
        }

        if self.api.list_refresh_ms == 0 || self.api.detail_refresh_ms == 0 {
            return Err("Refresh intervals must be non-zero".into());
        }

        if self.playback.mode == NegotiationMode::Edge {
            if self.edge.host.trim().is_empty() {
                return Err("Edge mode requires edge.host".into());
            }
            if self.edge.port == 0 {
                return Err("Edge mode requires a non-zero edge.port".into());
            }
            self.edge.negotiation_url("check")?;
        }

        if self.playback.gather_timeout_ms == 0 {
            return Err("ICE gathering timeout must be non-zero".into());
        }

        for server in &self.playback.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entries need at least one URL".into());
            }
        }

        Ok(())
    }
}


fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}

fn default_timeout_ms() -> u64 { 10_000 }
fn default_list_refresh_ms() -> u64 { 30_000 }
fn default_detail_refresh_ms() -> u64 { 10_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_edge_host() -> String { "127.0.0.1".to_string() }
fn default_edge_port() -> u16 { 8080 }
fn default_edge_app() -> String { "live".to_string() }
fn default_autoplay() -> bool { true }
fn default_retry_delay_ms() -> u64 { 500 }
fn default_gather_timeout_ms() -> u64 { 10_000 }

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}
