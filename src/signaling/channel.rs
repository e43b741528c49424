//! Signaling transport seam

use async_trait::async_trait;

use super::message::PeerId;
use crate::error::Result;

/// Out-of-band transport that carries signaling payloads between endpoints
///
/// Inbound payloads are not pulled through this trait: the transport owner
/// hands them to [`crate::session::SessionController::on_message`].
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Deliver a payload to a peer
    async fn send(&self, peer: &PeerId, payload: String) -> Result<()>;

    /// Leave the relay entirely
    async fn sign_out(&self) -> Result<()>;
}
