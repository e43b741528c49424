use thiserror::Error;

use crate::signaling::PeerId;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Already in a session with peer {0}")]
    AlreadyInSession(PeerId),

    #[error("A peer connection already exists")]
    AlreadyExists,

    #[error("No live peer connection")]
    NoConnection,

    #[error("Failed to create peer connection: {0}")]
    ResourceCreationFailed(String),

    #[error("Malformed signaling message: {0}")]
    MalformedMessage(String),

    #[error("Message from peer {got} while bound to peer {bound}")]
    UnexpectedPeer { bound: PeerId, got: PeerId },

    #[error("Negotiation rejected: {0}")]
    NegotiationRejected(String),

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Session controller is shut down")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Errors after which the current negotiation cannot continue
    pub fn is_negotiation_failure(&self) -> bool {
        matches!(
            self,
            AppError::NegotiationRejected(_) | AppError::NoConnection
        )
    }

    /// Errors that are absorbed by the message handler and only logged
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            AppError::MalformedMessage(_)
                | AppError::UnexpectedPeer { .. }
                | AppError::UnsupportedMessageType(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
