//! Media engine seam
//!
//! The session layer never touches codecs, capture or transport directly. It
//! drives a [`PeerConnection`] created by a [`MediaEngine`] and receives the
//! engine's notifications as [`EngineEvent`]s on an mpsc channel.
//!
//! ```text
//! SessionController ── NegotiationEngine ── ConnectionHandle
//!                                                 │
//!                                   MediaEngine::create_peer_connection
//!                                                 │
//!                               PeerConnection ───┴──> EngineEvent (mpsc)
//! ```

mod stats;
pub mod webrtc_engine;

pub use webrtc_engine::WebRtcEngine;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::MediaKind;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::signaling::{IceCandidate, SessionDescriptor};

/// Whether a track is captured locally or received from the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackOrigin {
    Local,
    Remote,
}

/// Media track description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track ID
    pub id: String,
    /// Audio or video
    pub kind: MediaKind,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// ICE connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IceConnectionState::New => write!(f, "new"),
            IceConnectionState::Checking => write!(f, "checking"),
            IceConnectionState::Connected => write!(f, "connected"),
            IceConnectionState::Completed => write!(f, "completed"),
            IceConnectionState::Disconnected => write!(f, "disconnected"),
            IceConnectionState::Failed => write!(f, "failed"),
            IceConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Notification raised by a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Local ICE candidate discovered; must be trickled to the peer
    CandidateGathered(IceCandidate),
    /// Remote track started
    TrackAdded(TrackInfo),
    /// Remote track ended
    TrackRemoved(TrackInfo),
    /// ICE connectivity changed
    IceConnectionStateChanged(IceConnectionState),
    /// Rendered frame rate changed
    FrameRateChanged { origin: TrackOrigin, fps: f32 },
    /// Rendered resolution changed
    ResolutionChanged {
        origin: TrackOrigin,
        width: u32,
        height: u32,
    },
}

/// Sender half handed to the engine for its notifications
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Factory for peer connections
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Allocate a peer connection with the configured ICE servers and
    /// bundle/transport policies
    ///
    /// Allocation failures are reported as `AppError::ResourceCreationFailed`.
    async fn create_peer_connection(
        &self,
        config: &SessionConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// A single peer connection owned by the media engine
///
/// Description and candidate failures are reported as
/// `AppError::NegotiationRejected`.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach local audio/video tracks, returning what was attached
    async fn add_local_media(&self) -> Result<Vec<TrackInfo>>;

    async fn create_offer(&self) -> Result<SessionDescriptor>;

    async fn create_answer(&self) -> Result<SessionDescriptor>;

    async fn set_local_description(&self, desc: SessionDescriptor) -> Result<()>;

    async fn set_remote_description(&self, desc: SessionDescriptor) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Whether candidates may be applied before a remote description is set
    fn buffers_early_candidates(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()>;
}
