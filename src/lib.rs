//! easystream-viewer - Easy Stream guest access and playback client
//!
//! Authorises guests to private broadcasts (password, share code, share
//! link), gates what the platform reveals to them, and negotiates
//! receive-only WebRTC playback against the streaming edge.

pub mod api;
pub mod auth;
pub mod config;
pub mod playback;
pub mod streams;
#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use api::{ApiClient, ApiError, ListQuery, OperatorSession};
pub use auth::{
    AccessCredentialProof, AccessToken, AccessTokenStore, AuthFailure, AuthorizationResolver, StreamId,
};
pub use config::{Config, NegotiationMode};
pub use playback::{NegotiationSession, PlaybackError, PlaybackStatus};
pub use streams::VisibilityGate;
