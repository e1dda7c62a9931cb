//! Offer/answer exchange with the negotiation endpoint
//!
//! Two endpoint shapes exist: the application proxy (`POST /streams/webrtc/{id}`,
//! JSON body, authorised by the viewer's access token) and the edge server's
//! own play endpoint (raw SDP body, addressed by the stream key). Replies are
//! classified once by content type into a `NegotiationReply`.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;

use super::PlaybackError;
use crate::api::{read_raw, ApiClient, ApiError};
use crate::auth::{AccessToken, StreamId};
use crate::config::{EdgeConfig, NegotiationMode};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    sdp: Option<String>,
}

/// Negotiation reply as received, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationReply {
    JsonEnvelope {
        code: Option<i64>,
        msg: Option<String>,
        sdp: Option<String>,
    },
    RawSdp(String),
}

impl NegotiationReply {
    /// Classify a reply body by its content type
    pub fn parse(content_type: Option<&str>, body: &str) -> Result<Self, PlaybackError> {
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if !is_json {
            return Ok(NegotiationReply::RawSdp(body.to_string()));
        }
        let envelope: Envelope = serde_json::from_str(body).map_err(|e| {
            PlaybackError::NegotiationRejected(format!("malformed negotiation reply: {}", e))
        })?;
        Ok(NegotiationReply::JsonEnvelope {
            code: envelope.code,
            msg: envelope.msg,
            sdp: envelope.sdp,
        })
    }

    /// Remote description, or the reason the server refused to provide one.
    ///
    /// A status other than 0 (including a missing one) is a rejection.
    pub fn into_answer(self) -> Result<String, PlaybackError> {
        match self {
            NegotiationReply::JsonEnvelope { code: Some(0), sdp, .. } => sdp
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    PlaybackError::NegotiationRejected("server returned no SDP".to_string())
                }),
            NegotiationReply::JsonEnvelope { code, msg, .. } => {
                let reason = msg.filter(|m| !m.is_empty()).unwrap_or_else(|| match code {
                    Some(code) => format!("negotiation rejected (code {})", code),
                    None => "negotiation reply carried no status".to_string(),
                });
                Err(PlaybackError::NegotiationRejected(reason))
            }
            NegotiationReply::RawSdp(sdp) => {
                if sdp.trim().is_empty() {
                    Err(PlaybackError::NegotiationRejected("server returned no SDP".to_string()))
                } else {
                    Ok(sdp)
                }
            }
        }
    }
}

fn playback_error(err: ApiError) -> PlaybackError {
    match err {
        e if e.is_timeout() => PlaybackError::Timeout(format!("negotiation timed out: {}", e)),
        ApiError::Status { status, message } if (400..500).contains(&status) => {
            PlaybackError::NegotiationRejected(message)
        }
        other => PlaybackError::TransportFailed(other.to_string()),
    }
}

#[async_trait]
pub trait SignalingEndpoint: Send + Sync {
    /// Send the complete local offer, return the remote answer
    async fn exchange(&self, offer_sdp: &str) -> Result<String, PlaybackError>;
}

/// Application proxy; never reveals the stream's internal name
pub struct ProxySignaling {
    api: ApiClient,
    selector: StreamId,
    access_token: Option<AccessToken>,
}

impl ProxySignaling {
    pub fn new(api: ApiClient, selector: StreamId, access_token: Option<AccessToken>) -> Self {
        Self {
            api,
            selector,
            access_token,
        }
    }
}

#[async_trait]
impl SignalingEndpoint for ProxySignaling {
    async fn exchange(&self, offer_sdp: &str) -> Result<String, PlaybackError> {
        let token = self.access_token.as_ref().map(|t| t.token());
        let reply = self
            .api
            .post_webrtc_offer(&self.selector.to_string(), offer_sdp, token)
            .await
            .map_err(playback_error)?;
        debug!("Proxy negotiation reply: {:?}", reply.content_type);
        NegotiationReply::parse(reply.content_type.as_deref(), &reply.body)?.into_answer()
    }
}

/// Edge server play endpoint, addressed by stream key
pub struct EdgeSignaling {
    http: reqwest::Client,
    url: Url,
}

impl EdgeSignaling {
    pub fn new(api: &ApiClient, edge: &EdgeConfig, stream_key: &str) -> Result<Self, PlaybackError> {
        Ok(Self {
            http: api.http().clone(),
            url: edge.negotiation_url(stream_key).map_err(PlaybackError::TransportFailed)?,
        })
    }
}

#[async_trait]
impl SignalingEndpoint for EdgeSignaling {
    async fn exchange(&self, offer_sdp: &str) -> Result<String, PlaybackError> {
        debug!("POST {} ({} bytes of SDP)", self.url, offer_sdp.len());
        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| playback_error(ApiError::Network(e)))?;
        let reply = read_raw(response).await.map_err(playback_error)?;
        NegotiationReply::parse(reply.content_type.as_deref(), &reply.body)?.into_answer()
    }
}

/// Build the endpoint for a deployment mode.
///
/// Edge mode needs the stream key, which only an operator holds.
pub fn endpoint_for(
    mode: NegotiationMode,
    api: &ApiClient,
    edge: &EdgeConfig,
    selector: &StreamId,
    access_token: Option<AccessToken>,
) -> Result<Box<dyn SignalingEndpoint>, PlaybackError> {
    info!("Negotiating stream {} via {} endpoint", selector, mode.as_str());
    match (mode, selector) {
        (NegotiationMode::Proxy, _) => Ok(Box::new(ProxySignaling::new(
            api.clone(),
            selector.clone(),
            access_token,
        ))),
        (NegotiationMode::Edge, StreamId::Key(key)) => Ok(Box::new(EdgeSignaling::new(api, edge, key)?)),
        (NegotiationMode::Edge, StreamId::Id(_)) => Err(PlaybackError::NegotiationRejected(
            "edge negotiation needs the stream key".to_string(),
        )),
    }
}
