//! Media engine backed by webrtc-rs
//!
//! Local tracks are `TrackLocalStaticSample`s (Opus audio, VP8 video). Feeding
//! them with captured media is outside this crate; the tracks exist so that
//! negotiation produces real send/receive media sections.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::stats::{VideoStats, VideoStatsChange};
use super::{
    EngineEvent, EngineEventSender, IceConnectionState, MediaEngine, PeerConnection, TrackInfo,
    TrackOrigin,
};
use crate::codec::MediaKind;
use crate::config::{BundlePolicy, IceServerConfig, IceTransportPolicy, SessionConfig};
use crate::error::{AppError, Result};
use crate::signaling::{IceCandidate, SdpType, SessionDescriptor};

/// Stream ID shared by the local tracks
const LOCAL_STREAM_ID: &str = "peercall-local";

/// Media engine creating webrtc-rs peer connections
#[derive(Debug, Clone, Default)]
pub struct WebRtcEngine;

impl WebRtcEngine {
    pub fn new() -> Self {
        Self
    }
}

fn ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    let mut ice_servers = vec![];
    for server in servers {
        // webrtc-rs refuses TURN servers without credentials
        if server.is_turn() && (server.username.is_empty() || server.credential.is_empty()) {
            warn!(
                "Skipping TURN server {:?} - credentials required but missing",
                server.urls
            );
            continue;
        }
        ice_servers.push(RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone(),
            credential: server.credential.clone(),
            ..Default::default()
        });
    }
    ice_servers
}

fn bundle_policy(policy: BundlePolicy) -> RTCBundlePolicy {
    match policy {
        BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
        BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
        BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
    }
}

fn ice_transport_policy(policy: IceTransportPolicy) -> RTCIceTransportPolicy {
    match policy {
        IceTransportPolicy::All => RTCIceTransportPolicy::All,
        IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
    }
}

fn media_kind(kind: RTPCodecType) -> Option<MediaKind> {
    match kind {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        _ => None,
    }
}

fn to_rtc_description(desc: &SessionDescriptor) -> Result<RTCSessionDescription> {
    let sdp = desc.sdp().to_string();
    let parsed = match desc.sdp_type() {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
    };
    parsed.map_err(|e| AppError::NegotiationRejected(format!("Invalid SDP {}: {}", desc.sdp_type(), e)))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescriptor> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        other => {
            return Err(AppError::NegotiationRejected(format!(
                "Unexpected local description type: {}",
                other
            )))
        }
    };
    Ok(SessionDescriptor::new(sdp_type, desc.sdp))
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_peer_connection(
        &self,
        config: &SessionConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            AppError::ResourceCreationFailed(format!("Failed to register codecs: {}", e))
        })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::ResourceCreationFailed(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(&config.ice_servers),
            bundle_policy: bundle_policy(config.bundle_policy),
            ice_transport_policy: ice_transport_policy(config.ice_transport_policy),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::ResourceCreationFailed(format!("Failed to create peer connection: {}", e))
        })?;

        let peer = WebRtcPeer {
            pc: Arc::new(pc),
            send_local_media: config.send_local_media,
            receive_audio: config.offer_to_receive_audio,
            receive_video: config.offer_to_receive_video,
        };
        peer.setup_event_handlers(events);

        info!(
            "Peer connection created ({} ICE servers, bundle {:?}, transport {:?})",
            config.ice_servers.len(),
            config.bundle_policy,
            config.ice_transport_policy
        );
        Ok(Arc::new(peer))
    }
}

fn video_event(change: VideoStatsChange) -> EngineEvent {
    match change {
        VideoStatsChange::FrameRate(fps) => EngineEvent::FrameRateChanged {
            origin: TrackOrigin::Remote,
            fps,
        },
        VideoStatsChange::Resolution { width, height } => EngineEvent::ResolutionChanged {
            origin: TrackOrigin::Remote,
            width,
            height,
        },
    }
}

/// webrtc-rs peer connection
struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    send_local_media: bool,
    receive_audio: bool,
    receive_video: bool,
}

impl WebRtcPeer {
    fn setup_event_handlers(&self, events: EngineEventSender) {
        // ICE candidate handler
        let tx = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let tx = tx.clone();
                Box::pin(async move {
                    // None marks the end of gathering
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("ICE candidate gathered: {}", init.candidate);
                            // Candidates belong to the bundled transport; webrtc-rs leaves the mid empty
                            let sdp_mid = init
                                .sdp_mid
                                .filter(|m| !m.is_empty())
                                .unwrap_or_else(|| "0".to_string());
                            let _ = tx.send(EngineEvent::CandidateGathered(IceCandidate::new(
                                sdp_mid,
                                init.sdp_mline_index.unwrap_or(0),
                                init.candidate,
                            )));
                        }
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));

        // ICE connection state handler
        let tx = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                let tx = tx.clone();
                Box::pin(async move {
                    let state = match s {
                        RTCIceConnectionState::New => IceConnectionState::New,
                        RTCIceConnectionState::Checking => IceConnectionState::Checking,
                        RTCIceConnectionState::Connected => IceConnectionState::Connected,
                        RTCIceConnectionState::Completed => IceConnectionState::Completed,
                        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
                        RTCIceConnectionState::Failed => IceConnectionState::Failed,
                        RTCIceConnectionState::Closed => IceConnectionState::Closed,
                        _ => return,
                    };
                    let _ = tx.send(EngineEvent::IceConnectionStateChanged(state));
                })
            }));

        // Remote track handler: the track is drained until it ends so that
        // interceptors keep running, then reported as removed
        let tx = events;
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                Box::pin(async move {
                    let Some(kind) = media_kind(track.kind()) else {
                        return;
                    };
                    let info = TrackInfo::new(track.id(), kind);
                    info!("Remote {} track started: {}", kind, info.id);
                    let _ = tx.send(EngineEvent::TrackAdded(info.clone()));

                    tokio::spawn(async move {
                        let mut stats = (kind == MediaKind::Video).then(|| {
                            let vp8 = track
                                .codec()
                                .capability
                                .mime_type
                                .eq_ignore_ascii_case(MIME_TYPE_VP8);
                            VideoStats::new(vp8, Instant::now())
                        });

                        while let Ok((packet, _)) = track.read_rtp().await {
                            let Some(stats) = stats.as_mut() else { continue };
                            for change in
                                stats.on_packet(Instant::now(), packet.header.marker, &packet.payload)
                            {
                                let _ = tx.send(video_event(change));
                            }
                        }
                        debug!("Remote {} track ended: {}", kind, info.id);
                        let _ = tx.send(EngineEvent::TrackRemoved(info));
                    });
                })
            },
        ));
    }

    async fn add_local_track(&self, kind: MediaKind) -> Result<TrackInfo> {
        let (mime_type, clock_rate, channels) = match kind {
            MediaKind::Audio => (MIME_TYPE_OPUS, 48000, 2),
            MediaKind::Video => (MIME_TYPE_VP8, 90000, 0),
        };
        let id = format!("local-{}", kind);
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                clock_rate,
                channels,
                ..Default::default()
            },
            id.clone(),
            LOCAL_STREAM_ID.to_owned(),
        ));

        self.pc
            .add_track(track)
            .await
            .map_err(|e| AppError::NegotiationRejected(format!("Failed to add {} track: {}", kind, e)))?;

        Ok(TrackInfo::new(id, kind))
    }

    async fn add_receive_only(&self, kind: RTPCodecType) -> Result<()> {
        self.pc
            .add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::NegotiationRejected(format!("Failed to add transceiver: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_local_media(&self) -> Result<Vec<TrackInfo>> {
        if self.send_local_media {
            let audio = self.add_local_track(MediaKind::Audio).await?;
            let video = self.add_local_track(MediaKind::Video).await?;
            return Ok(vec![video, audio]);
        }

        if self.receive_audio {
            self.add_receive_only(RTPCodecType::Audio).await?;
        }
        if self.receive_video {
            self.add_receive_only(RTPCodecType::Video).await?;
        }
        Ok(vec![])
    }

    async fn create_offer(&self) -> Result<SessionDescriptor> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::NegotiationRejected(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescriptor> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::NegotiationRejected(format!("Failed to create answer: {}", e)))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescriptor) -> Result<()> {
        let rtc = to_rtc_description(&desc)?;
        self.pc.set_local_description(rtc).await.map_err(|e| {
            AppError::NegotiationRejected(format!("Failed to set local description: {}", e))
        })
    }

    async fn set_remote_description(&self, desc: SessionDescriptor) -> Result<()> {
        let rtc = to_rtc_description(&desc)?;
        self.pc.set_remote_description(rtc).await.map_err(|e| {
            AppError::NegotiationRejected(format!("Failed to set remote description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: Some(candidate.sdp_mid),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            username_fragment: None,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::NegotiationRejected(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::NegotiationRejected(format!("Failed to close peer connection: {}", e)))
    }
}
