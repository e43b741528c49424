//! Public session API
//!
//! All work happens on one worker task fed by a queue: local commands, raw
//! signaling messages, and engine events are handled strictly in arrival
//! order, so the negotiation engine never sees two inputs at once.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::engine::NegotiationEngine;
use super::handle::{ConnectionEvent, ConnectionHandle};
use super::state::{ConnectionState, SessionSnapshot};
use crate::config::{IceServerConfig, SessionConfig};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::media::MediaEngine;
use crate::signaling::{PeerId, SignalingChannel, SignalingMessage};
use crate::utils::LogThrottler;
use crate::warn_throttled;

enum Command {
    Connect {
        peer: PeerId,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Inbound {
        from: PeerId,
        raw: Bytes,
    },
    ConfigureIceServers(Vec<IceServerConfig>),
}

/// Handle to a call session
///
/// Cheap to clone; all clones drive the same worker. The worker stops (and
/// hangs up any active call) on [`SessionController::shutdown`] or once every
/// clone has been dropped.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus>,
    handle: Arc<ConnectionHandle>,
    state_rx: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionController {
    /// Create the session and spawn its worker on the current runtime
    pub fn new(
        config: SessionConfig,
        media: Arc<dyn MediaEngine>,
        signaling: Arc<dyn SignalingChannel>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let handle = Arc::new(ConnectionHandle::new(media, events.clone()));
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let engine = NegotiationEngine::new(
            config,
            handle.clone(),
            signaling,
            events.clone(),
            connection_tx,
        );
        let state_rx = engine.subscribe_state();

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(
            engine,
            commands_rx,
            connection_rx,
            cancel.clone(),
        ));

        Self {
            commands,
            events,
            handle,
            state_rx,
            cancel,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Call `peer`
    ///
    /// Resolves once the offer has been sent (or the attempt failed). Fails
    /// with [`AppError::AlreadyInSession`] while another call is bound.
    pub async fn connect(&self, peer: impl Into<PeerId>) -> Result<()> {
        if let Some(bound) = self.state_rx.borrow().peer.clone() {
            return Err(AppError::AlreadyInSession(bound));
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                peer: peer.into(),
                reply,
            })
            .map_err(|_| AppError::SessionClosed)?;
        rx.await.map_err(|_| AppError::SessionClosed)?
    }

    /// Hang up the current call, if any
    ///
    /// Always succeeds; resolves once the session is idle again.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_err() {
            debug!("Disconnect on stopped session");
            return;
        }
        let _ = rx.await;
    }

    /// Feed a raw message received from the relay
    ///
    /// Never blocks; the message is parsed and handled on the worker.
    pub fn on_message(&self, from: impl Into<PeerId>, raw: impl Into<Bytes>) {
        let command = Command::Inbound {
            from: from.into(),
            raw: raw.into(),
        };
        if self.commands.send(command).is_err() {
            debug!("Dropping inbound message, session stopped");
        }
    }

    /// Replace the ICE servers used for the next connection
    pub fn configure_ice_servers(&self, servers: Vec<IceServerConfig>) {
        if self
            .commands
            .send(Command::ConfigureIceServers(servers))
            .is_err()
        {
            debug!("Ignoring ICE server update, session stopped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().state
    }

    pub fn peer(&self) -> Option<PeerId> {
        self.state_rx.borrow().peer.clone()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    /// Whether a peer connection currently exists
    pub fn has_connection(&self) -> bool {
        self.handle.exists()
    }

    /// Hang up and stop the worker
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Session worker ended abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    mut engine: NegotiationEngine,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    cancel: CancellationToken,
) {
    let discards = LogThrottler::with_secs(5);
    debug!("Session worker started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Session shutting down");
                break;
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All session handles dropped");
                    break;
                };
                handle_command(&mut engine, &discards, command).await;
            }

            Some(event) = connection_events.recv() => {
                engine.handle_connection_event(event).await;
            }
        }
    }

    engine.disconnect().await;
    debug!("Session worker stopped");
}

async fn handle_command(engine: &mut NegotiationEngine, discards: &LogThrottler, command: Command) {
    match command {
        Command::Connect { peer, reply } => {
            let result = engine.connect(peer.clone()).await;
            if let Err(e) = &result {
                error!("Call to peer {} failed: {}", peer, e);
            }
            let _ = reply.send(result);
        }
        Command::Disconnect { reply } => {
            engine.disconnect().await;
            discards.clear_all();
            let _ = reply.send(());
        }
        Command::Inbound { from, raw } => {
            let result = match SignalingMessage::parse(&raw) {
                Ok(message) => {
                    debug!("Received {} from peer {}", message.kind(), from);
                    engine.handle_message(from.clone(), message).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                report_inbound_error(discards, &from, e);
            }
        }
        Command::ConfigureIceServers(servers) => engine.configure_ice_servers(servers),
    }
}

fn report_inbound_error(discards: &LogThrottler, from: &PeerId, err: AppError) {
    let reason = match &err {
        AppError::MalformedMessage(_) => "malformed",
        AppError::UnexpectedPeer { .. } => "unexpected-peer",
        AppError::UnsupportedMessageType(_) => "unsupported",
        _ => {
            error!("Message from peer {} failed: {}", from, err);
            return;
        }
    };

    let key = format!("{}/{}", from, reason);
    warn_throttled!(discards, &key, "Discarding message from peer {}: {}", from, err);
}
