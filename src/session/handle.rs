//! Exclusive owner of the single peer connection
//!
//! The slot holding the live connection is guarded by one short-lived lock.
//! Engine calls are made on a cloned `Arc` outside the lock, and the slot is
//! re-checked afterwards, so a concurrent [`ConnectionHandle::close`] never
//! waits on an in-flight description step and a step finishing after close
//! reports [`AppError::NoConnection`] instead of touching a dead connection.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::{EngineEvent, MediaEngine, PeerConnection, TrackInfo};
use crate::signaling::{IceCandidate, SessionDescriptor};

/// Engine notification tagged with the connection that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub connection_id: Uuid,
    pub event: EngineEvent,
}

struct LiveConnection {
    id: Uuid,
    pc: Arc<dyn PeerConnection>,
    remote_description_set: bool,
    /// Remote candidates received before the remote description
    pending_candidates: Vec<IceCandidate>,
    /// Task forwarding engine events; aborting it drops the subscription
    forwarder: JoinHandle<()>,
}

enum Slot {
    Empty,
    /// Allocation in progress; a close in this state cancels the allocation
    Creating,
    Live(LiveConnection),
}

/// Owner of the peer connection resource
pub struct ConnectionHandle {
    engine: Arc<dyn MediaEngine>,
    events: Arc<EventBus>,
    slot: Mutex<Slot>,
}

impl ConnectionHandle {
    pub fn new(engine: Arc<dyn MediaEngine>, events: Arc<EventBus>) -> Self {
        Self {
            engine,
            events,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Whether a connection is live (or being allocated)
    pub fn exists(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Empty)
    }

    /// ID of the live connection
    pub fn connection_id(&self) -> Option<Uuid> {
        match &*self.slot.lock() {
            Slot::Live(live) => Some(live.id),
            _ => None,
        }
    }

    /// Allocate the peer connection
    ///
    /// Engine events are forwarded to `sink`, tagged with the new connection
    /// ID, until the connection is closed.
    pub async fn create(
        &self,
        config: &SessionConfig,
        sink: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Result<Uuid> {
        {
            let mut slot = self.slot.lock();
            if !matches!(*slot, Slot::Empty) {
                return Err(AppError::AlreadyExists);
            }
            *slot = Slot::Creating;
        }

        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let pc = match self.engine.create_peer_connection(config, engine_tx).await {
            Ok(pc) => pc,
            Err(e) => {
                let mut slot = self.slot.lock();
                if matches!(*slot, Slot::Creating) {
                    *slot = Slot::Empty;
                }
                return Err(match e {
                    AppError::ResourceCreationFailed(_) => e,
                    other => AppError::ResourceCreationFailed(other.to_string()),
                });
            }
        };

        let id = Uuid::new_v4();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                let tagged = ConnectionEvent {
                    connection_id: id,
                    event,
                };
                if sink.send(tagged).is_err() {
                    break;
                }
            }
        });

        let installed = {
            let mut slot = self.slot.lock();
            if matches!(*slot, Slot::Creating) {
                *slot = Slot::Live(LiveConnection {
                    id,
                    pc: pc.clone(),
                    remote_description_set: false,
                    pending_candidates: vec![],
                    forwarder,
                });
                true
            } else {
                forwarder.abort();
                false
            }
        };

        if !installed {
            debug!("Connection {} closed while being created", id);
            if let Err(e) = pc.close().await {
                warn!("Failed to release cancelled connection {}: {}", id, e);
            }
            return Err(AppError::NoConnection);
        }

        info!("Peer connection {} created", id);
        self.events
            .publish(SessionEvent::PeerConnectionCreated { connection_id: id });
        Ok(id)
    }

    /// Release the connection
    ///
    /// Idempotent: returns `false` without side effects when nothing is live.
    /// When it returns `true` the engine resource has been closed and
    /// `connection.closed` published exactly once.
    pub async fn close(&self) -> bool {
        let live = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Live(live) => live,
                Slot::Creating | Slot::Empty => return false,
            }
        };

        live.forwarder.abort();
        if let Err(e) = live.pc.close().await {
            warn!("Error while closing peer connection {}: {}", live.id, e);
        }
        drop(live.pc);

        info!("Peer connection {} closed", live.id);
        self.events.publish(SessionEvent::PeerConnectionClosed {
            connection_id: live.id,
        });
        true
    }

    fn current(&self) -> Result<(Uuid, Arc<dyn PeerConnection>)> {
        match &*self.slot.lock() {
            Slot::Live(live) => Ok((live.id, live.pc.clone())),
            _ => Err(AppError::NoConnection),
        }
    }

    fn ensure_current(&self, id: Uuid) -> Result<()> {
        match &*self.slot.lock() {
            Slot::Live(live) if live.id == id => Ok(()),
            _ => Err(AppError::NoConnection),
        }
    }

    /// Attach local media to the connection
    pub async fn add_local_media(&self) -> Result<Vec<TrackInfo>> {
        let (id, pc) = self.current()?;
        let tracks = pc.add_local_media().await?;
        self.ensure_current(id)?;
        Ok(tracks)
    }

    pub async fn create_local_offer(&self) -> Result<SessionDescriptor> {
        let (id, pc) = self.current()?;
        let offer = pc.create_offer().await?;
        self.ensure_current(id)?;
        Ok(offer)
    }

    pub async fn create_local_answer(&self) -> Result<SessionDescriptor> {
        let (id, pc) = self.current()?;
        let answer = pc.create_answer().await?;
        self.ensure_current(id)?;
        Ok(answer)
    }

    pub async fn set_local_description(&self, desc: SessionDescriptor) -> Result<()> {
        let (id, pc) = self.current()?;
        pc.set_local_description(desc).await?;
        self.ensure_current(id)
    }

    /// Apply the remote description, then any candidates queued before it
    pub async fn set_remote_description(&self, desc: SessionDescriptor) -> Result<()> {
        let (id, pc) = self.current()?;
        pc.set_remote_description(desc).await?;

        let pending = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Live(live) if live.id == id => {
                    live.remote_description_set = true;
                    std::mem::take(&mut live.pending_candidates)
                }
                _ => return Err(AppError::NoConnection),
            }
        };

        if !pending.is_empty() {
            debug!("Applying {} queued remote candidates", pending.len());
        }
        for candidate in pending {
            pc.add_ice_candidate(candidate).await?;
            self.ensure_current(id)?;
        }
        Ok(())
    }

    /// Apply a remote ICE candidate
    ///
    /// Queued locally until the remote description is set, unless the engine
    /// buffers early candidates itself.
    pub async fn add_remote_candidate(
        &self,
        sdp_mid: &str,
        sdp_mline_index: u16,
        candidate: &str,
    ) -> Result<()> {
        let candidate = IceCandidate::new(sdp_mid, sdp_mline_index, candidate);

        let (id, pc) = {
            let mut slot = self.slot.lock();
            let Slot::Live(live) = &mut *slot else {
                return Err(AppError::NoConnection);
            };
            if !live.remote_description_set && !live.pc.buffers_early_candidates() {
                debug!("Queueing remote candidate until remote description is set");
                live.pending_candidates.push(candidate);
                return Ok(());
            }
            (live.id, live.pc.clone())
        };

        pc.add_ice_candidate(candidate).await?;
        self.ensure_current(id)
    }

    /// Number of remote candidates waiting for the remote description
    pub fn pending_candidate_count(&self) -> usize {
        match &*self.slot.lock() {
            Slot::Live(live) => live.pending_candidates.len(),
            _ => 0,
        }
    }
}
