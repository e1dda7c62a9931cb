//! REST client for the Easy Stream platform API
//!
//! Thin typed wrapper over `reqwest`. Guest requests never carry the operator
//! bearer so the server always answers them with the restricted record shape.

pub mod types;

use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::ApiConfig;
use types::{
    ApiErrorBody, ShareGrant, Stream, StreamList, StreamStatus, StreamView, StreamViewList,
    StreamVisibility, VerifyPasswordRequest, VerifyPasswordResponse, VerifyShareCodeRequest,
    VerifyShareLinkRequest, WebRtcOffer,
};

/// Errors raised by the REST layer
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Connection, timeout or body transfer failure
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Server answered with a non-success status
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    /// Response body did not have the expected shape
    #[error("unexpected response: {0}")]
    Decode(String),
    /// A full-record read path was requested without an operator session
    #[error("operator session required")]
    OperatorRequired,
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Network(e) if e.is_timeout())
    }
}

/// Bearer credential of an authenticated operator
#[derive(Clone)]
pub struct OperatorSession {
    bearer: String,
}

impl OperatorSession {
    pub fn new(bearer: impl Into<String>) -> Self {
        Self { bearer: bearer.into() }
    }
}

impl std::fmt::Debug for OperatorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorSession").finish_non_exhaustive()
    }
}

/// Filters accepted by `GET /streams`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub status: Option<StreamStatus>,
    pub visibility: Option<StreamVisibility>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListQuery {
    /// Public broadcasts currently on air, the guest landing listing
    pub fn live_public() -> Self {
        Self {
            status: Some(StreamStatus::Pushing),
            visibility: Some(StreamVisibility::Public),
            ..Default::default()
        }
    }

    fn params(&self, access_token: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(status) = self.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some(visibility) = self.visibility {
            params.push(("visibility", visibility.as_str().to_string()));
        }
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(page_size) = self.page_size {
            params.push(("pageSize", page_size.to_string()));
        }
        if let Some(token) = access_token {
            params.push(("access_token", token.to_string()));
        }
        params
    }
}

/// Raw negotiation reply, parsed by the playback layer
#[derive(Debug, Clone)]
pub struct RawReply {
    pub content_type: Option<String>,
    pub body: String,
}

/// Platform API client
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    operator: Option<OperatorSession>,
}

impl ApiClient {
    /// Create a client from the `[api]` configuration section
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            operator: None,
        })
    }

    /// Attach an operator session, enabling the full-record read paths
    pub fn with_operator(mut self, session: OperatorSession) -> Self {
        self.operator = Some(session);
        self
    }

    pub fn has_operator(&self) -> bool {
        self.operator.is_some()
    }

    /// Underlying HTTP client, shared with direct edge negotiation
    pub fn http(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn operator_request(&self, builder: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let session = self.operator.as_ref().ok_or(ApiError::OperatorRequired)?;
        Ok(builder.bearer_auth(&session.bearer))
    }

    /// `POST /streams/{key}/verify`
    pub async fn verify_password(
        &self,
        stream_key: &str,
        password: &str,
    ) -> Result<VerifyPasswordResponse, ApiError> {
        let url = self.url(&format!("/streams/{}/verify", stream_key));
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&VerifyPasswordRequest { password })
            .send()
            .await?;
        decode(response).await
    }

    /// `POST /shares/verify-code`
    pub async fn verify_share_code(&self, share_code: &str) -> Result<ShareGrant, ApiError> {
        let url = self.url("/shares/verify-code");
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&VerifyShareCodeRequest { share_code })
            .send()
            .await?;
        decode(response).await
    }

    /// `POST /shares/verify-link`
    pub async fn verify_share_link(&self, token: &str) -> Result<ShareGrant, ApiError> {
        let url = self.url("/shares/verify-link");
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(&VerifyShareLinkRequest { token })
            .send()
            .await?;
        decode(response).await
    }

    /// Guest listing, `GET /streams` without operator credentials
    pub async fn list_stream_views(
        &self,
        query: &ListQuery,
        access_token: Option<&str>,
    ) -> Result<StreamViewList, ApiError> {
        let url = self.url("/streams");
        debug!("GET {} (guest, token: {})", url, access_token.is_some());
        let response = self
            .client
            .get(&url)
            .query(&query.params(access_token))
            .send()
            .await?;
        decode(response).await
    }

    /// Guest detail, `GET /streams/view/{id}`
    pub async fn stream_view(
        &self,
        id: u64,
        access_token: Option<&str>,
    ) -> Result<StreamView, ApiError> {
        let url = self.url(&format!("/streams/view/{}", id));
        debug!("GET {} (guest, token: {})", url, access_token.is_some());
        let mut request = self.client.get(&url);
        if let Some(token) = access_token {
            request = request.query(&[("access_token", token)]);
        }
        decode(request.send().await?).await
    }

    /// Password-unlocked detail, `GET /streams/{key}?access_token=…`.
    ///
    /// Decoded into the restricted shape so the key never leaves this call.
    pub async fn stream_view_by_key(
        &self,
        stream_key: &str,
        access_token: Option<&str>,
    ) -> Result<StreamView, ApiError> {
        let url = self.url(&format!("/streams/{}", stream_key));
        debug!("GET {} (guest, token: {})", url, access_token.is_some());
        let mut request = self.client.get(&url);
        if let Some(token) = access_token {
            request = request.query(&[("access_token", token)]);
        }
        decode(request.send().await?).await
    }

    /// Operator listing with full records
    pub async fn list_streams(&self, query: &ListQuery) -> Result<StreamList<Stream>, ApiError> {
        let url = self.url("/streams");
        let request = self.operator_request(self.client.get(&url))?;
        debug!("GET {} (operator)", url);
        decode(request.query(&query.params(None)).send().await?).await
    }

    /// Operator detail with full record, `GET /streams/{key}`
    pub async fn stream(&self, stream_key: &str) -> Result<Stream, ApiError> {
        let url = self.url(&format!("/streams/{}", stream_key));
        let request = self.operator_request(self.client.get(&url))?;
        debug!("GET {} (operator)", url);
        decode(request.send().await?).await
    }

    /// Application-layer negotiation, `POST /streams/webrtc/{selector}`
    pub async fn post_webrtc_offer(
        &self,
        selector: &str,
        sdp: &str,
        access_token: Option<&str>,
    ) -> Result<RawReply, ApiError> {
        let url = self.url(&format!("/streams/webrtc/{}", selector));
        debug!("POST {} ({} bytes of SDP)", url, sdp.len());
        let mut request = self.client.post(&url).json(&WebRtcOffer { sdp });
        if let Some(token) = access_token {
            request = request.query(&[("access_token", token)]);
        }
        if let Some(session) = &self.operator {
            request = request.bearer_auth(&session.bearer);
        }
        read_raw(request.send().await?).await
    }
}

/// Read status, content type and body without interpreting them
pub async fn read_raw(response: Response) -> Result<RawReply, ApiError> {
    let response = check_status(response).await?;
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = response.text().await?;
    Ok(RawReply { content_type, body })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: error_message(status, &text),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.msg).filter(|m| !m.is_empty()) {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
