//! Low-latency playback negotiation
//!
//! This module provides WebRTC playback against the streaming edge:
//! - Transport seam (peer connection lifecycle, callbacks)
//! - SDP offer/answer exchange with the proxy or edge endpoint
//! - Per-viewing-attempt session state machine

pub mod session;
pub mod signaling;
pub mod transport;
#[cfg(feature = "webrtc-transport")]
pub mod rtc;

pub use session::{NegotiationSession, Presentation};
pub use signaling::{EdgeSignaling, NegotiationReply, ProxySignaling, SignalingEndpoint};
pub use transport::{MediaTransport, TrackInfo, TransportFactory, TransportState};

use std::fmt;

/// Playback state observed by the viewing surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Connecting,
    Playing,
    Paused,
    Error,
}

impl PlaybackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Connecting => "connecting",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Error => "error",
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback failures. Recorded on the session, not thrown to the surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The negotiation endpoint refused or answered without a description
    #[error("{0}")]
    NegotiationRejected(String),
    /// Peer connection could not be built, or failed or disconnected
    #[error("{0}")]
    TransportFailed(String),
    /// ICE gathering or the negotiation request took too long
    #[error("{0}")]
    Timeout(String),
}
