//! Offer/answer state machine
//!
//! Owned by the controller's worker task, so every method runs to completion
//! before the next message is looked at. That serialization is what keeps the
//! transitions below race-free:
//!
//! ```text
//! Idle ──connect──> AwaitingLocalOffer ──offer sent──> AwaitingRemoteAnswer ──answer──> Connected
//! Idle ──offer────> AwaitingLocalAnswer ──answer sent──────────────────────────────────> Connected
//! any bound state ──hangup / disconnect / rejection──> Closing ──> Idle
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::handle::{ConnectionEvent, ConnectionHandle};
use super::state::{BoundState, ConnectionState, Phase, SessionSnapshot};
use crate::codec::CodecCatalog;
use crate::config::{IceServerConfig, SessionConfig};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::{EngineEvent, TrackOrigin};
use crate::sdp::reorder_codecs;
use crate::signaling::{PeerId, SdpType, SessionDescriptor, SignalingChannel, SignalingMessage};

/// Negotiation state machine for one session
pub struct NegotiationEngine {
    config: SessionConfig,
    catalog: CodecCatalog,
    handle: Arc<ConnectionHandle>,
    signaling: Arc<dyn SignalingChannel>,
    events: Arc<EventBus>,
    /// Where the handle forwards engine events (the controller's queue)
    connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    phase: Phase,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl NegotiationEngine {
    pub fn new(
        config: SessionConfig,
        handle: Arc<ConnectionHandle>,
        signaling: Arc<dyn SignalingChannel>,
        events: Arc<EventBus>,
        connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            config,
            catalog: CodecCatalog,
            handle,
            signaling,
            events,
            connection_events,
            phase: Phase::Idle,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.phase.state()
    }

    pub fn peer(&self) -> Option<&PeerId> {
        self.phase.peer()
    }

    /// Watch the state from outside the worker
    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_tx.subscribe()
    }

    /// Replace the ICE servers used for the next connection
    pub fn configure_ice_servers(&mut self, servers: Vec<IceServerConfig>) {
        info!("ICE servers configured: {} entries", servers.len());
        self.config.ice_servers = servers;
    }

    fn transition(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        let from = self.phase.state();
        self.phase = phase;
        let snapshot = self.phase.snapshot();

        match &snapshot.peer {
            Some(peer) => info!("Session {} -> {} (peer {})", from, snapshot.state, peer),
            None => info!("Session {} -> {}", from, snapshot.state),
        }

        self.events.publish(SessionEvent::StateChanged {
            state: snapshot.state,
            peer: snapshot.peer.clone(),
        });
        self.state_tx.send_replace(snapshot);
    }

    fn advance(&mut self, state: BoundState) {
        if let Phase::Bound { peer, .. } = &self.phase {
            let peer = peer.clone();
            self.transition(Phase::Bound { peer, state });
        }
    }

    async fn send(&self, peer: &PeerId, message: SignalingMessage) {
        debug!("Sending {} to peer {}", message.kind(), peer);
        if let Err(e) = self.signaling.send(peer, message.to_wire()).await {
            warn!("Failed to send {} to peer {}: {}", message.kind(), peer, e);
        }
    }

    /// Local request to call `peer`
    pub async fn connect(&mut self, peer: PeerId) -> Result<()> {
        if let Phase::Bound { peer: bound, .. } = &self.phase {
            return Err(AppError::AlreadyInSession(bound.clone()));
        }

        info!("Connecting to peer {}", peer);
        self.transition(Phase::Bound {
            peer: peer.clone(),
            state: BoundState::AwaitingLocalOffer,
        });

        self.create_connection().await?;

        let result = self.send_local_offer(&peer).await;
        self.finish_step(result).await?;
        self.advance(BoundState::AwaitingRemoteAnswer);
        Ok(())
    }

    /// Local hangup; a no-op when idle
    pub async fn disconnect(&mut self) {
        let Some(peer) = self.phase.peer().cloned() else {
            debug!("Disconnect requested while idle");
            return;
        };

        info!("Hanging up on peer {}", peer);
        self.advance(BoundState::Closing);
        self.send(&peer, SignalingMessage::Hangup).await;
        self.teardown().await;
    }

    /// Handle a parsed message from `from`
    ///
    /// Discarded messages come back as errors for which
    /// [`AppError::is_discardable`] holds; the state is unchanged in that case.
    pub async fn handle_message(&mut self, from: PeerId, message: SignalingMessage) -> Result<()> {
        if let Some(bound) = self.phase.peer() {
            if *bound != from {
                return Err(AppError::UnexpectedPeer {
                    bound: bound.clone(),
                    got: from,
                });
            }
        }

        let state = self.phase.state();
        match (state, message) {
            (ConnectionState::Idle, SignalingMessage::Offer(sdp)) => self.accept_offer(from, sdp).await,
            (ConnectionState::Idle, SignalingMessage::Hangup) => {
                debug!("Ignoring hangup from peer {} while idle", from);
                Ok(())
            }
            (ConnectionState::Idle, message) => Err(AppError::UnsupportedMessageType(format!(
                "{} while idle (left over from a closed connection?)",
                message.kind()
            ))),
            (ConnectionState::AwaitingRemoteAnswer, SignalingMessage::Answer(sdp)) => {
                let result = self
                    .handle
                    .set_remote_description(SessionDescriptor::answer(sdp))
                    .await;
                self.finish_step(result).await?;
                self.advance(BoundState::Connected);
                Ok(())
            }
            (ConnectionState::AwaitingRemoteAnswer, SignalingMessage::ProvisionalAnswer(sdp)) => {
                let result = self
                    .handle
                    .set_remote_description(SessionDescriptor::new(SdpType::Pranswer, sdp))
                    .await;
                self.finish_step(result).await?;
                debug!("Provisional answer applied, still awaiting final answer");
                Ok(())
            }
            (_, SignalingMessage::Hangup) => {
                info!("Peer {} hung up", from);
                self.advance(BoundState::Closing);
                self.teardown().await;
                Ok(())
            }
            (ConnectionState::Closing, message) => Err(AppError::UnsupportedMessageType(format!(
                "{} while closing",
                message.kind()
            ))),
            (_, SignalingMessage::IceCandidate(c)) => {
                debug!("Applying remote candidate {} (mid {})", c.candidate, c.sdp_mid);
                let result = self
                    .handle
                    .add_remote_candidate(&c.sdp_mid, c.sdp_mline_index, &c.candidate)
                    .await;
                self.finish_step(result).await
            }
            (state, message) => Err(AppError::UnsupportedMessageType(format!(
                "{} while {}",
                message.kind(),
                state
            ))),
        }
    }

    /// Handle a notification from the live connection
    pub async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if self.handle.connection_id() != Some(event.connection_id) {
            debug!("Dropping event from stale connection {}", event.connection_id);
            return;
        }

        match event.event {
            EngineEvent::CandidateGathered(candidate) => {
                if let Some(peer) = self.phase.peer().cloned() {
                    self.send(&peer, SignalingMessage::IceCandidate(candidate)).await;
                }
            }
            EngineEvent::TrackAdded(track) => self.events.publish(SessionEvent::TrackAdded {
                origin: TrackOrigin::Remote,
                track,
            }),
            EngineEvent::TrackRemoved(track) => self.events.publish(SessionEvent::TrackRemoved {
                origin: TrackOrigin::Remote,
                track,
            }),
            EngineEvent::IceConnectionStateChanged(state) => {
                info!("ICE connection state: {}", state);
                self.events
                    .publish(SessionEvent::IceConnectionStateChanged { state });
            }
            EngineEvent::FrameRateChanged { origin, fps } => self
                .events
                .publish(SessionEvent::FrameRateChanged { origin, fps }),
            EngineEvent::ResolutionChanged {
                origin,
                width,
                height,
            } => self.events.publish(SessionEvent::ResolutionChanged {
                origin,
                width,
                height,
            }),
        }
    }

    async fn accept_offer(&mut self, from: PeerId, sdp: String) -> Result<()> {
        info!("Offer received from peer {}", from);
        self.transition(Phase::Bound {
            peer: from.clone(),
            state: BoundState::AwaitingLocalAnswer,
        });

        self.create_connection().await?;

        let result = self.answer_offer(&from, SessionDescriptor::offer(sdp)).await;
        self.finish_step(result).await?;
        self.advance(BoundState::Connected);
        Ok(())
    }

    async fn answer_offer(&mut self, from: &PeerId, offer: SessionDescriptor) -> Result<()> {
        self.attach_local_media().await?;
        self.handle.set_remote_description(offer).await?;
        let answer = self.handle.create_local_answer().await?;
        self.handle.set_local_description(answer.clone()).await?;
        self.send(from, SignalingMessage::from_description(&answer)).await;
        Ok(())
    }

    async fn send_local_offer(&mut self, peer: &PeerId) -> Result<()> {
        self.attach_local_media().await?;

        let offer = self.handle.create_local_offer().await?;
        let (audio_pt, video_pt) = self.config.preferred_payload_types(&self.catalog);
        let offer = match reorder_codecs(offer.sdp(), audio_pt, video_pt) {
            Ok(sdp) => offer.with_sdp(sdp),
            Err(e) => {
                warn!("Keeping engine codec order: {}", e);
                offer
            }
        };

        self.handle.set_local_description(offer.clone()).await?;
        self.send(peer, SignalingMessage::from_description(&offer)).await;
        Ok(())
    }

    async fn attach_local_media(&mut self) -> Result<()> {
        for track in self.handle.add_local_media().await? {
            self.events.publish(SessionEvent::TrackAdded {
                origin: TrackOrigin::Local,
                track,
            });
        }
        Ok(())
    }

    /// Allocate the connection; failure signs out of the relay and unbinds
    async fn create_connection(&mut self) -> Result<()> {
        let err = match self
            .handle
            .create(&self.config, self.connection_events.clone())
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        error!("Failed to initialize peer connection: {}", err);
        if let Err(e) = self.signaling.sign_out().await {
            warn!("Sign-out after connection failure failed: {}", e);
        }
        self.transition(Phase::Idle);

        Err(match err {
            AppError::ResourceCreationFailed(_) => err,
            other => AppError::ResourceCreationFailed(other.to_string()),
        })
    }

    /// Tear the session down if a negotiation step failed
    async fn finish_step(&mut self, result: Result<()>) -> Result<()> {
        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if err.is_negotiation_failure() {
            error!("Negotiation failed, tearing down: {}", err);
            if let Some(peer) = self.phase.peer().cloned() {
                self.advance(BoundState::Closing);
                self.send(&peer, SignalingMessage::Hangup).await;
            }
            self.teardown().await;
        }
        Err(err)
    }

    async fn teardown(&mut self) {
        self.handle.close().await;
        self.transition(Phase::Idle);
    }
}
