//! webrtc-rs backed media transport
//!
//! Builds receive-only peer connections (one video and one audio
//! transceiver) and drains inbound RTP so the connection stays healthy
//! when no renderer is attached.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::transport::{MediaTransport, StateHandler, TrackHandler, TrackInfo, TransportFactory, TransportState};
use super::PlaybackError;
use crate::config::IceServerConfig;

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            _ => TransportState::New,
        }
    }
}

fn failed(context: &str, e: impl std::fmt::Display) -> PlaybackError {
    PlaybackError::TransportFailed(format!("{}: {}", context, e))
}

/// Opens peer connections with the configured ICE servers
pub struct RtcTransportFactory {
    ice_servers: Vec<IceServerConfig>,
    packets: Arc<AtomicU64>,
}

impl RtcTransportFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self {
            ice_servers,
            packets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// RTP packets received across every transport this factory opened,
    /// excluding those that arrived while paused
    pub fn packets_received(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    fn register_codecs(media_engine: &mut MediaEngine) -> Result<(), PlaybackError> {
        let codecs = [
            (
                MIME_TYPE_H264,
                90000,
                0,
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
                96,
                RTPCodecType::Video,
            ),
            (MIME_TYPE_VP8, 90000, 0, "", 97, RTPCodecType::Video),
            (MIME_TYPE_OPUS, 48000, 2, "minptime=10;useinbandfec=1", 111, RTPCodecType::Audio),
        ];

        for (mime_type, clock_rate, channels, fmtp, payload_type, kind) in codecs {
            media_engine
                .register_codec(
                    RTCRtpCodecParameters {
                        capability: RTCRtpCodecCapability {
                            mime_type: mime_type.to_string(),
                            clock_rate,
                            channels,
                            sdp_fmtp_line: fmtp.to_string(),
                            rtcp_feedback: vec![],
                        },
                        payload_type,
                        ..Default::default()
                    },
                    kind,
                )
                .map_err(|e| failed(&format!("Failed to register {}", mime_type), e))?;
        }
        Ok(())
    }

    async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, PlaybackError> {
        let mut media_engine = MediaEngine::default();
        Self::register_codecs(&mut media_engine)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| failed("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| failed("Failed to create peer connection", e))?;

        Ok(Arc::new(peer_connection))
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn open(&self) -> Result<Arc<dyn MediaTransport>, PlaybackError> {
        let pc = self.create_peer_connection().await?;

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| failed(&format!("Failed to add {} transceiver", kind), e))?;
        }

        debug!("Opened receive-only peer connection");
        Ok(Arc::new(RtcTransport {
            pc,
            closed: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            packets: self.packets.clone(),
        }))
    }
}

/// One receive-only peer connection
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    closed: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    packets: Arc<AtomicU64>,
}

#[async_trait]
impl MediaTransport for RtcTransport {
    fn on_track(&self, handler: TrackHandler) {
        let handler = Arc::new(handler);
        let closed = self.closed.clone();
        let paused = self.paused.clone();
        let packets = self.packets.clone();

        self.pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let handler = handler.clone();
            let closed = closed.clone();
            let paused = paused.clone();
            let packets = packets.clone();
            Box::pin(async move {
                if closed.load(Ordering::SeqCst) {
                    return;
                }
                let info = TrackInfo {
                    kind: track.kind().to_string(),
                    codec: track.codec().capability.mime_type,
                };
                handler(info);

                tokio::spawn(async move {
                    while !closed.load(Ordering::SeqCst) {
                        match track.read_rtp().await {
                            Ok(_) => {
                                if !paused.load(Ordering::Relaxed) {
                                    packets.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Err(e) => {
                                debug!("Track {} ended: {}", track.kind(), e);
                                break;
                            }
                        }
                    }
                });
            })
        }));
    }

    fn on_connection_state_change(&self, handler: StateHandler) {
        let handler = Arc::new(handler);
        let closed = self.closed.clone();
        self.pc.on_peer_connection_state_change(Box::new(move |state| {
            let handler = handler.clone();
            let closed = closed.clone();
            Box::pin(async move {
                if !closed.load(Ordering::SeqCst) {
                    handler(TransportState::from(state));
                }
            })
        }));
    }

    async fn gather_offer(&self) -> Result<String, PlaybackError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| failed("Failed to create offer", e))?;

        // Must be taken before the local description starts gathering
        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| failed("Failed to set local description", e))?;

        let _ = gather_complete.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| PlaybackError::TransportFailed("no local description after gathering".to_string()))
    }

    async fn apply_answer(&self, sdp: &str) -> Result<(), PlaybackError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| PlaybackError::NegotiationRejected(format!("Invalid SDP answer: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| PlaybackError::NegotiationRejected(format!("Failed to set remote description: {}", e)))?;
        info!("Remote description applied");
        Ok(())
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pc = self.pc.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = pc.close().await {
                        warn!("Failed to close peer connection: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime available to close peer connection"),
        }
    }
}
