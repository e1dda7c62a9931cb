//! Media transport seam
//!
//! One `MediaTransport` is one receive-only peer connection. The session owns
//! at most one at a time and closes it before opening the next.

use async_trait::async_trait;
use std::sync::Arc;

use super::PlaybackError;

/// Peer connection state, as reported by `connectionstatechange`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States that end playback
    pub fn is_lost(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Disconnected)
    }
}

/// Inbound media track announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// `video` or `audio`
    pub kind: String,
    pub codec: String,
}

/// Callback for inbound tracks
pub type TrackHandler = Box<dyn Fn(TrackInfo) + Send + Sync>;

/// Callback for connection state changes
pub type StateHandler = Box<dyn Fn(TransportState) + Send + Sync>;

#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Register the inbound-track callback. Must be called before negotiating.
    fn on_track(&self, handler: TrackHandler);

    /// Register the connection-state callback. Must be called before negotiating.
    fn on_connection_state_change(&self, handler: StateHandler);

    /// Create the receive-only offer, apply it locally and wait until ICE
    /// gathering has completed. Returns the final local description.
    async fn gather_offer(&self) -> Result<String, PlaybackError>;

    /// Apply the remote answer
    async fn apply_answer(&self, sdp: &str) -> Result<(), PlaybackError>;

    /// Stop or resume rendering inbound media. No renegotiation.
    fn set_paused(&self, paused: bool);

    /// Detach callbacks and release the connection. Returns immediately;
    /// nothing the handle reports afterwards is acted upon.
    fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn MediaTransport>, PlaybackError>;
}
