//! Authorization Resolver
//!
//! Exchanges exactly one proof per attempt for a stream-scoped token:
//! - password: `POST /streams/{key}/verify`, token stored under the stream key
//! - share code: `POST /shares/verify-code`, the server names the stream
//! - share link: `POST /shares/verify-link`, run automatically from a landing URL
//!
//! A success overwrites the stream's entry in the store and refreshes the
//! gate's current listing. A failure leaves the store untouched.

use log::{info, warn};
use reqwest::Url;
use std::sync::Arc;

use super::{
    AccessCredentialProof, AccessToken, AccessTokenStore, AuthFailure, IssuedVia, StreamId,
    SHARE_CODE_LEN,
};
use crate::api::ApiClient;
use crate::streams::VisibilityGate;

/// Credential carried by the URL a viewer landed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandingCredential {
    None,
    /// Token already issued, e.g. `/live/view/7?access_token=…`
    AccessToken { stream_id: Option<u64>, token: String },
    /// Share link, e.g. `/?share_token=…`
    ShareLink { token: String },
}

impl LandingCredential {
    /// Inspect a landing URL. `access_token` wins over `share_token`.
    pub fn from_url(url: &str) -> Result<Self, AuthFailure> {
        let parsed = Url::parse(url)
            .map_err(|e| AuthFailure::InvalidCredential(format!("malformed link: {}", e)))?;

        let mut access_token = None;
        let mut share_token = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "access_token" if !value.is_empty() => access_token = Some(value.into_owned()),
                "share_token" if !value.is_empty() => share_token = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(token) = access_token {
            return Ok(LandingCredential::AccessToken {
                stream_id: stream_id_from_path(&parsed),
                token,
            });
        }
        Ok(match share_token {
            Some(token) => LandingCredential::ShareLink { token },
            None => LandingCredential::None,
        })
    }
}

/// Numeric id from a `/live/view/{id}` path
fn stream_id_from_path(url: &Url) -> Option<u64> {
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [.., "view", id] => id.parse().ok(),
        _ => None,
    }
}

pub struct AuthorizationResolver {
    api: ApiClient,
    store: AccessTokenStore,
    gate: Option<Arc<VisibilityGate>>,
}

impl AuthorizationResolver {
    pub fn new(api: ApiClient, store: AccessTokenStore) -> Self {
        Self {
            api,
            store,
            gate: None,
        }
    }

    /// Refresh this gate's listing after every successful grant
    pub fn with_gate(mut self, gate: Arc<VisibilityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn store(&self) -> &AccessTokenStore {
        &self.store
    }

    /// Exchange a proof for an access token
    pub async fn verify(&self, proof: AccessCredentialProof) -> Result<AccessToken, AuthFailure> {
        let via = proof.issued_via();
        let token = self
            .exchange(proof)
            .await
            .map_err(|e| {
                warn!("{:?} verification failed: {}", via, e);
                e
            })?;
        self.grant(token.clone()).await;
        Ok(token)
    }

    async fn exchange(&self, proof: AccessCredentialProof) -> Result<AccessToken, AuthFailure> {
        match proof {
            AccessCredentialProof::Password { stream_key, password } => {
                let stream_key = stream_key.trim().to_string();
                if stream_key.is_empty() || password.is_empty() {
                    return Err(AuthFailure::InvalidCredential(
                        "stream key and password are required".to_string(),
                    ));
                }
                let response = self
                    .api
                    .verify_password(&stream_key, &password)
                    .await
                    .map_err(|e| AuthFailure::from_api(IssuedVia::Password, e))?;
                Ok(AccessToken::new(
                    StreamId::Key(stream_key),
                    response.token,
                    IssuedVia::Password,
                    None,
                ))
            }
            AccessCredentialProof::ShareCode { code } => {
                let code = code.trim();
                if code.chars().count() != SHARE_CODE_LEN {
                    return Err(AuthFailure::InvalidCredential(format!(
                        "share code must be {} characters",
                        SHARE_CODE_LEN
                    )));
                }
                let grant = self
                    .api
                    .verify_share_code(code)
                    .await
                    .map_err(|e| AuthFailure::from_api(IssuedVia::ShareCode, e))?;
                Ok(AccessToken::new(
                    StreamId::Id(grant.stream_id),
                    grant.access_token,
                    IssuedVia::ShareCode,
                    Some(grant.expires_at),
                ))
            }
            AccessCredentialProof::ShareLinkToken { token } => {
                if token.trim().is_empty() {
                    return Err(AuthFailure::InvalidCredential("empty share link".to_string()));
                }
                let grant = self
                    .api
                    .verify_share_link(token.trim())
                    .await
                    .map_err(|e| AuthFailure::from_api(IssuedVia::ShareLink, e))?;
                Ok(AccessToken::new(
                    StreamId::Id(grant.stream_id),
                    grant.access_token,
                    IssuedVia::ShareLink,
                    Some(grant.expires_at),
                ))
            }
        }
    }

    async fn grant(&self, token: AccessToken) {
        info!(
            "Granted {:?} access to stream {} ({})",
            token.issued_via(),
            token.stream_id(),
            token.redacted()
        );
        self.store.put(token);
        if let Some(gate) = &self.gate {
            if let Err(e) = gate.refresh().await {
                warn!("Listing refresh after grant failed: {}", e);
            }
        }
    }

    /// Handle the credential carried by a landing URL.
    ///
    /// Share links verify without user action; a bare access token is stored
    /// as-is for the stream named in the path.
    pub async fn resolve_landing(&self, url: &str) -> Result<Option<AccessToken>, AuthFailure> {
        match LandingCredential::from_url(url)? {
            LandingCredential::None => Ok(None),
            LandingCredential::ShareLink { token } => self
                .verify(AccessCredentialProof::ShareLinkToken { token })
                .await
                .map(Some),
            LandingCredential::AccessToken { stream_id: Some(id), token } => {
                let token = AccessToken::new(StreamId::Id(id), token, IssuedVia::LandingUrl, None);
                self.grant(token.clone()).await;
                Ok(Some(token))
            }
            LandingCredential::AccessToken { stream_id: None, .. } => Err(
                AuthFailure::InvalidCredential("access token link does not name a stream".to_string()),
            ),
        }
    }
}
