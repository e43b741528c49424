mod common;

use std::sync::atomic::Ordering;

use common::{peer, FakeMedia, Harness, ANSWER_SDP, OFFER_SDP, REJECT_MARKER};
use peercall::events::SessionEvent;
use peercall::media::{EngineEvent, IceConnectionState, TrackOrigin};
use peercall::sdp::payload_types;
use peercall::codec::MediaKind;
use peercall::session::ConnectionState;
use peercall::signaling::{IceCandidate, SdpType, SignalingMessage};
use peercall::AppError;
use tokio_test::{assert_err, assert_ok};

fn offer() -> SignalingMessage {
    SignalingMessage::Offer(OFFER_SDP.to_string())
}

fn answer() -> SignalingMessage {
    SignalingMessage::Answer(ANSWER_SDP.to_string())
}

fn candidate(n: u32) -> SignalingMessage {
    SignalingMessage::IceCandidate(IceCandidate::new(
        "0",
        0,
        format!("candidate:{} 1 udp 2122260223 192.168.1.{} 50000 typ host", n, n),
    ))
}

#[tokio::test]
async fn test_inbound_offer_connects_and_answers_once() {
    let mut h = Harness::new();

    h.engine.handle_message(peer(42), offer()).await.unwrap();

    assert_eq!(h.engine.state(), ConnectionState::Connected);
    assert_eq!(h.engine.peer(), Some(&peer(42)));
    assert!(h.handle.exists());

    let sent = h.channel.sent_to(&peer(42));
    assert_eq!(sent, vec![SignalingMessage::Answer(ANSWER_SDP.to_string())]);
    assert_eq!(h.channel.sent().len(), 1);
    assert_eq!(*h.media.log.remote_descriptions.lock(), vec![SdpType::Offer]);
}

#[tokio::test]
async fn test_connect_sends_reordered_offer() {
    let mut h = Harness::new();

    h.engine.connect(peer(7)).await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::AwaitingRemoteAnswer);

    let sent = h.channel.sent_to(&peer(7));
    assert_eq!(sent.len(), 1);
    let SignalingMessage::Offer(sdp) = &sent[0] else {
        panic!("expected offer, got {:?}", sent[0]);
    };

    assert_eq!(payload_types(sdp, MediaKind::Audio)[0], vec!["111", "103", "0"]);
    assert_eq!(payload_types(sdp, MediaKind::Video)[0], vec!["96", "100"]);

    // The local description matches what was sent
    let local = h.media.log.local_descriptions.lock();
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].sdp(), sdp);
}

#[tokio::test]
async fn test_connect_while_bound_is_rejected() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    let err = h.engine.connect(peer(8)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyInSession(p) if p == peer(7)));
    assert_eq!(h.engine.peer(), Some(&peer(7)));
    assert!(h.channel.sent_to(&peer(8)).is_empty());
    assert_eq!(h.media.log.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_full_offer_answer_exchange() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    assert_ok!(h.engine.handle_message(peer(7), answer()).await);
    assert_eq!(h.engine.state(), ConnectionState::Connected);
    assert_eq!(*h.media.log.remote_descriptions.lock(), vec![SdpType::Answer]);
}

#[tokio::test]
async fn test_message_from_other_peer_is_discarded() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    let err = h.engine.handle_message(peer(9), answer()).await.unwrap_err();
    assert!(err.is_discardable());
    assert!(matches!(err, AppError::UnexpectedPeer { .. }));

    let err = h.engine.handle_message(peer(9), offer()).await.unwrap_err();
    assert!(err.is_discardable());

    assert_eq!(h.engine.state(), ConnectionState::AwaitingRemoteAnswer);
    assert_eq!(h.engine.peer(), Some(&peer(7)));
    assert!(h.channel.sent_to(&peer(9)).is_empty());
    assert!(h.media.log.remote_descriptions.lock().is_empty());
}

#[tokio::test]
async fn test_disconnect_sends_one_hangup_and_unbinds() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();
    h.engine.handle_message(peer(7), answer()).await.unwrap();

    h.engine.disconnect().await;
    h.engine.disconnect().await;

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(h.engine.peer().is_none());
    assert!(!h.handle.exists());
    assert_eq!(h.channel.hangups_to(&peer(7)), 1);
    assert_eq!(h.media.log.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disconnect_when_idle_is_noop() {
    let mut h = Harness::new();
    h.engine.disconnect().await;

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn test_remote_hangup_tears_down_without_reply() {
    let mut h = Harness::new();
    h.engine.handle_message(peer(42), offer()).await.unwrap();

    h.engine
        .handle_message(peer(42), SignalingMessage::Hangup)
        .await
        .unwrap();

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(!h.handle.exists());
    assert_eq!(h.channel.hangups_to(&peer(42)), 0);

    // A late hangup while idle is harmless
    h.engine
        .handle_message(peer(42), SignalingMessage::Hangup)
        .await
        .unwrap();
    assert_eq!(h.media.log.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_candidate_while_idle_is_discarded() {
    let mut h = Harness::new();

    let err = h.engine.handle_message(peer(7), candidate(1)).await.unwrap_err();
    assert!(matches!(err, AppError::UnsupportedMessageType(_)));
    assert!(err.is_discardable());

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(!h.handle.exists());
    assert_eq!(h.media.log.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_answer_while_idle_is_discarded() {
    let mut h = Harness::new();

    let err = assert_err!(h.engine.handle_message(peer(7), answer()).await);
    assert!(err.is_discardable());
    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn test_second_offer_is_discarded() {
    let mut h = Harness::new();
    h.engine.handle_message(peer(42), offer()).await.unwrap();

    let err = h.engine.handle_message(peer(42), offer()).await.unwrap_err();
    assert!(matches!(err, AppError::UnsupportedMessageType(_)));

    assert_eq!(h.engine.state(), ConnectionState::Connected);
    assert_eq!(h.channel.sent().len(), 1);
    assert_eq!(h.media.log.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_provisional_answer_keeps_waiting() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    h.engine
        .handle_message(peer(7), SignalingMessage::ProvisionalAnswer(ANSWER_SDP.to_string()))
        .await
        .unwrap();
    assert_eq!(h.engine.state(), ConnectionState::AwaitingRemoteAnswer);

    h.engine.handle_message(peer(7), answer()).await.unwrap();
    assert_eq!(h.engine.state(), ConnectionState::Connected);
    assert_eq!(
        *h.media.log.remote_descriptions.lock(),
        vec![SdpType::Pranswer, SdpType::Answer]
    );
}

#[tokio::test]
async fn test_creation_failure_signs_out() {
    let mut h = Harness::with_media(FakeMedia::failing());

    let err = h.engine.connect(peer(7)).await.unwrap_err();
    assert!(matches!(err, AppError::ResourceCreationFailed(_)));

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(h.engine.peer().is_none());
    assert_eq!(h.channel.sign_outs.load(Ordering::SeqCst), 1);
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn test_creation_failure_on_inbound_offer() {
    let mut h = Harness::with_media(FakeMedia::failing());

    let err = h.engine.handle_message(peer(42), offer()).await.unwrap_err();
    assert!(matches!(err, AppError::ResourceCreationFailed(_)));
    assert!(!err.is_discardable());

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert_eq!(h.channel.sign_outs.load(Ordering::SeqCst), 1);
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn test_rejected_answer_tears_down() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    let bad = SignalingMessage::Answer(format!("{}{}\r\n", ANSWER_SDP, REJECT_MARKER));
    let err = h.engine.handle_message(peer(7), bad).await.unwrap_err();
    assert!(err.is_negotiation_failure());

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert!(!h.handle.exists());
    assert_eq!(h.channel.hangups_to(&peer(7)), 1);
    assert_eq!(h.media.log.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_offer_tears_down() {
    let mut h = Harness::new();

    let bad = SignalingMessage::Offer(format!("{}{}\r\n", OFFER_SDP, REJECT_MARKER));
    let err = h.engine.handle_message(peer(42), bad).await.unwrap_err();
    assert!(matches!(err, AppError::NegotiationRejected(_)));

    assert_eq!(h.engine.state(), ConnectionState::Idle);
    assert_eq!(h.channel.sent_to(&peer(42)), vec![SignalingMessage::Hangup]);
}

#[tokio::test]
async fn test_early_candidates_are_queued() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    h.engine.handle_message(peer(7), candidate(1)).await.unwrap();
    h.engine.handle_message(peer(7), candidate(2)).await.unwrap();
    assert_eq!(h.handle.pending_candidate_count(), 2);
    assert_eq!(h.media.log.candidates_applied.load(Ordering::SeqCst), 0);

    h.engine.handle_message(peer(7), answer()).await.unwrap();
    assert_eq!(h.handle.pending_candidate_count(), 0);
    assert_eq!(h.media.log.candidates_applied.load(Ordering::SeqCst), 2);

    h.engine.handle_message(peer(7), candidate(3)).await.unwrap();
    assert_eq!(h.media.log.candidates_applied.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gathered_candidates_go_to_bound_peer() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    let local = IceCandidate::new("0", 0, "candidate:1 1 udp 1 10.0.0.1 4000 typ host");
    h.media.emit(EngineEvent::CandidateGathered(local.clone()));
    let event = h.connection_events.recv().await.unwrap();
    h.engine.handle_connection_event(event).await;

    let sent = h.channel.sent_to(&peer(7));
    assert_eq!(sent.last(), Some(&SignalingMessage::IceCandidate(local)));
}

#[tokio::test]
async fn test_events_from_closed_connection_are_dropped() {
    let mut h = Harness::new();
    h.engine.connect(peer(7)).await.unwrap();

    h.media.emit(EngineEvent::CandidateGathered(IceCandidate::new("0", 0, "candidate:1")));
    let stale = h.connection_events.recv().await.unwrap();

    h.engine.disconnect().await;
    let before = h.channel.sent().len();

    h.engine.handle_connection_event(stale).await;
    assert_eq!(h.channel.sent().len(), before);
}

#[tokio::test]
async fn test_session_events() {
    let mut h = Harness::new();
    let mut rx = h.events.subscribe();

    h.engine.handle_message(peer(42), offer()).await.unwrap();
    h.media
        .emit(EngineEvent::IceConnectionStateChanged(IceConnectionState::Connected));
    let event = h.connection_events.recv().await.unwrap();
    h.engine.handle_connection_event(event).await;
    h.engine.disconnect().await;

    let mut names = vec![];
    let mut local_tracks = 0;
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::TrackAdded {
            origin: TrackOrigin::Local,
            ..
        } = &event
        {
            local_tracks += 1;
        }
        names.push(event.name());
    }

    assert_eq!(local_tracks, 2);
    assert_eq!(names.iter().filter(|n| **n == "connection.created").count(), 1);
    assert_eq!(names.iter().filter(|n| **n == "connection.closed").count(), 1);
    assert!(names.contains(&"ice.connection_state_changed"));
    assert_eq!(names.first(), Some(&"session.state_changed"));
    assert_eq!(names.last(), Some(&"session.state_changed"));
}

#[tokio::test]
async fn test_state_watch_reflects_binding() {
    let mut h = Harness::new();
    let rx = h.engine.subscribe_state();

    h.engine.connect(peer(7)).await.unwrap();
    assert_eq!(rx.borrow().peer, Some(peer(7)));
    assert_eq!(rx.borrow().state, ConnectionState::AwaitingRemoteAnswer);

    h.engine.disconnect().await;
    assert!(rx.borrow().is_idle());
    assert!(rx.borrow().peer.is_none());
}
