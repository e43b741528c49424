//! Session event types
//!
//! Defines all events published on the session event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::{IceConnectionState, TrackInfo, TrackOrigin};
use crate::session::ConnectionState;
use crate::signaling::PeerId;

/// Session event enumeration
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Negotiation state changed
    #[serde(rename = "session.state_changed")]
    StateChanged {
        state: ConnectionState,
        /// Bound peer, `None` when idle
        peer: Option<PeerId>,
    },

    /// Peer connection resource allocated
    #[serde(rename = "connection.created")]
    PeerConnectionCreated { connection_id: Uuid },

    /// Peer connection resource released
    #[serde(rename = "connection.closed")]
    PeerConnectionClosed { connection_id: Uuid },

    /// Media track attached (local capture or remote stream)
    #[serde(rename = "track.added")]
    TrackAdded { origin: TrackOrigin, track: TrackInfo },

    /// Media track detached
    #[serde(rename = "track.removed")]
    TrackRemoved { origin: TrackOrigin, track: TrackInfo },

    /// Rendered frame rate of a video track changed
    #[serde(rename = "track.frame_rate_changed")]
    FrameRateChanged { origin: TrackOrigin, fps: f32 },

    /// Resolution of a video track changed
    #[serde(rename = "track.resolution_changed")]
    ResolutionChanged {
        origin: TrackOrigin,
        width: u32,
        height: u32,
    },

    /// ICE connectivity changed
    #[serde(rename = "ice.connection_state_changed")]
    IceConnectionStateChanged { state: IceConnectionState },
}

impl SessionEvent {
    /// Event name as used in the serialized form
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "session.state_changed",
            SessionEvent::PeerConnectionCreated { .. } => "connection.created",
            SessionEvent::PeerConnectionClosed { .. } => "connection.closed",
            SessionEvent::TrackAdded { .. } => "track.added",
            SessionEvent::TrackRemoved { .. } => "track.removed",
            SessionEvent::FrameRateChanged { .. } => "track.frame_rate_changed",
            SessionEvent::ResolutionChanged { .. } => "track.resolution_changed",
            SessionEvent::IceConnectionStateChanged { .. } => "ice.connection_state_changed",
        }
    }
}
