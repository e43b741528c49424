//! Negotiation state

use serde::{Deserialize, Serialize};

use crate::signaling::PeerId;

/// Negotiation state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No peer bound, no connection
    #[default]
    Idle,
    /// Local connect accepted, offer being produced
    AwaitingLocalOffer,
    /// Offer sent, waiting for the peer's answer
    AwaitingRemoteAnswer,
    /// Remote offer applied, answer being produced
    AwaitingLocalAnswer,
    /// Offer/answer exchange complete
    Connected,
    /// Teardown in progress
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::AwaitingLocalOffer => write!(f, "awaiting-local-offer"),
            ConnectionState::AwaitingRemoteAnswer => write!(f, "awaiting-remote-answer"),
            ConnectionState::AwaitingLocalAnswer => write!(f, "awaiting-local-answer"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closing => write!(f, "closing"),
        }
    }
}

/// Session phase: the bound peer exists exactly when the session is not idle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Phase {
    #[default]
    Idle,
    Bound { peer: PeerId, state: BoundState },
}

/// States that carry a bound peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundState {
    AwaitingLocalOffer,
    AwaitingRemoteAnswer,
    AwaitingLocalAnswer,
    Connected,
    Closing,
}

impl From<BoundState> for ConnectionState {
    fn from(state: BoundState) -> Self {
        match state {
            BoundState::AwaitingLocalOffer => ConnectionState::AwaitingLocalOffer,
            BoundState::AwaitingRemoteAnswer => ConnectionState::AwaitingRemoteAnswer,
            BoundState::AwaitingLocalAnswer => ConnectionState::AwaitingLocalAnswer,
            BoundState::Connected => ConnectionState::Connected,
            BoundState::Closing => ConnectionState::Closing,
        }
    }
}

impl Phase {
    pub(crate) fn state(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Idle,
            Phase::Bound { state, .. } => (*state).into(),
        }
    }

    pub(crate) fn peer(&self) -> Option<&PeerId> {
        match self {
            Phase::Idle => None,
            Phase::Bound { peer, .. } => Some(peer),
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            peer: self.peer().cloned(),
        }
    }
}

/// Externally observable view of the session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub peer: Option<PeerId>,
}

impl SessionSnapshot {
    pub fn is_idle(&self) -> bool {
        self.state == ConnectionState::Idle
    }
}
