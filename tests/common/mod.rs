//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use peercall::codec::MediaKind;
use peercall::config::SessionConfig;
use peercall::events::EventBus;
use peercall::media::{EngineEvent, EngineEventSender, MediaEngine, PeerConnection, TrackInfo};
use peercall::session::{
    ConnectionEvent, ConnectionHandle, ConnectionState, NegotiationEngine, SessionController,
};
use peercall::signaling::{IceCandidate, PeerId, SdpType, SessionDescriptor, SignalingChannel, SignalingMessage};
use peercall::{AppError, Result};

/// Remote descriptions containing this marker are rejected by [`FakePeer`]
pub const REJECT_MARKER: &str = "a=x-reject";

pub const OFFER_SDP: &str = "v=0\r\n\
o=- 1 1 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 103 111 0\r\n\
a=rtpmap:103 ISAC/16000\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=rtpmap:0 PCMU/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 100 96\r\n\
a=rtpmap:100 H264/90000\r\n\
a=rtpmap:96 VP8/90000\r\n";

pub const ANSWER_SDP: &str = "v=0\r\n\
o=- 2 1 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// What the fake media layer observed
#[derive(Default)]
pub struct MediaLog {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub candidates_applied: AtomicUsize,
    pub remote_descriptions: Mutex<Vec<SdpType>>,
    pub local_descriptions: Mutex<Vec<SessionDescriptor>>,
}

pub struct FakePeer {
    log: Arc<MediaLog>,
    _events: EngineEventSender,
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_local_media(&self) -> Result<Vec<TrackInfo>> {
        Ok(vec![
            TrackInfo::new("audio0", MediaKind::Audio),
            TrackInfo::new("video0", MediaKind::Video),
        ])
    }

    async fn create_offer(&self) -> Result<SessionDescriptor> {
        Ok(SessionDescriptor::offer(OFFER_SDP))
    }

    async fn create_answer(&self) -> Result<SessionDescriptor> {
        Ok(SessionDescriptor::answer(ANSWER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescriptor) -> Result<()> {
        self.log.local_descriptions.lock().push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescriptor) -> Result<()> {
        if desc.sdp().contains(REJECT_MARKER) {
            return Err(AppError::NegotiationRejected("unacceptable description".into()));
        }
        self.log.remote_descriptions.lock().push(desc.sdp_type());
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<()> {
        self.log.candidates_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Media engine that allocates [`FakePeer`]s
#[derive(Default)]
pub struct FakeMedia {
    pub log: Arc<MediaLog>,
    pub fail_create: AtomicBool,
    /// Event sender of the most recent connection
    events: Mutex<Option<EngineEventSender>>,
}

impl FakeMedia {
    pub fn failing() -> Self {
        let media = Self::default();
        media.fail_create.store(true, Ordering::SeqCst);
        media
    }

    /// Raise an event on the most recent connection
    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl MediaEngine for FakeMedia {
    async fn create_peer_connection(
        &self,
        _config: &SessionConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::ResourceCreationFailed("out of ports".into()));
        }
        self.log.created.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events.clone());
        Ok(Arc::new(FakePeer {
            log: self.log.clone(),
            _events: events,
        }))
    }
}

/// Signaling channel that records everything sent
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(PeerId, String)>>,
    pub sign_outs: AtomicUsize,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<(PeerId, String)> {
        self.sent.lock().clone()
    }

    /// Parsed messages sent to `peer`
    pub fn sent_to(&self, peer: &PeerId) -> Vec<SignalingMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, payload)| SignalingMessage::parse(payload.as_bytes()).unwrap())
            .collect()
    }

    pub fn hangups_to(&self, peer: &PeerId) -> usize {
        self.sent_to(peer)
            .iter()
            .filter(|m| **m == SignalingMessage::Hangup)
            .count()
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    async fn send(&self, peer: &PeerId, payload: String) -> Result<()> {
        self.sent.lock().push((peer.clone(), payload));
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Negotiation engine wired to fakes
pub struct Harness {
    pub engine: NegotiationEngine,
    pub media: Arc<FakeMedia>,
    pub channel: Arc<RecordingChannel>,
    pub events: Arc<EventBus>,
    pub handle: Arc<ConnectionHandle>,
    pub connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_media(FakeMedia::default())
    }

    pub fn with_media(media: FakeMedia) -> Self {
        let media = Arc::new(media);
        let channel = Arc::new(RecordingChannel::default());
        let events = Arc::new(EventBus::new());
        let handle = Arc::new(ConnectionHandle::new(media.clone(), events.clone()));
        let (tx, connection_events) = mpsc::unbounded_channel();
        let engine = NegotiationEngine::new(
            SessionConfig::default(),
            handle.clone(),
            channel.clone(),
            events.clone(),
            tx,
        );
        Self {
            engine,
            media,
            channel,
            events,
            handle,
            connection_events,
        }
    }
}

pub fn peer(id: u64) -> PeerId {
    PeerId::from(id)
}

/// Wait until `session` reaches `state`
pub async fn wait_for_state(session: &SessionController, state: ConnectionState) {
    let mut rx = session.watch_state();
    tokio::time::timeout(Duration::from_secs(2), async {
        while rx.borrow_and_update().state != state {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}, at {}", state, session.state()));
}
