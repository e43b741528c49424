//! In-process signaling relay
//!
//! Routes payloads between endpoints registered in the same process. Useful
//! for loopback calls and tests; a networked relay implements the same
//! [`SignalingChannel`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::channel::SignalingChannel;
use super::message::PeerId;
use crate::error::{AppError, Result};

/// Payload delivered to an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: PeerId,
    pub payload: String,
}

/// Relay shared by all endpoints
#[derive(Clone, Default)]
pub struct LocalRelay {
    endpoints: Arc<RwLock<HashMap<PeerId, mpsc::UnboundedSender<Delivery>>>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint; re-registering an id replaces the previous one
    pub fn register(&self, id: PeerId) -> (RelayEndpoint, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.write().insert(id.clone(), tx);
        info!("Relay endpoint registered: {}", id);

        let endpoint = RelayEndpoint {
            id,
            relay: self.clone(),
        };
        (endpoint, rx)
    }

    pub fn is_registered(&self, id: &PeerId) -> bool {
        self.endpoints.read().contains_key(id)
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, payload: String) -> Result<()> {
        let tx = self
            .endpoints
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| AppError::Signaling(format!("peer {} is not signed in", to)))?;

        tx.send(Delivery {
            from: from.clone(),
            payload,
        })
        .map_err(|_| AppError::Signaling(format!("peer {} stopped receiving", to)))
    }

    fn unregister(&self, id: &PeerId) -> bool {
        self.endpoints.write().remove(id).is_some()
    }
}

/// One endpoint's view of the relay
#[derive(Clone)]
pub struct RelayEndpoint {
    id: PeerId,
    relay: LocalRelay,
}

impl RelayEndpoint {
    /// Identifier this endpoint is registered under
    pub fn id(&self) -> &PeerId {
        &self.id
    }
}

#[async_trait]
impl SignalingChannel for RelayEndpoint {
    async fn send(&self, peer: &PeerId, payload: String) -> Result<()> {
        debug!("Relay {} -> {}: {} bytes", self.id, peer, payload.len());
        self.relay.deliver(&self.id, peer, payload)
    }

    async fn sign_out(&self) -> Result<()> {
        if self.relay.unregister(&self.id) {
            info!("Relay endpoint signed out: {}", self.id);
        }
        Ok(())
    }
}
