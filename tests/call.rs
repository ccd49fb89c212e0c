//! Call manager lifecycle and candidate ordering

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use pendant_gateway::call::{CallState, PeerCallManager};
use pendant_gateway::signaling::store::{MemoryStore, SignalStore};
use pendant_gateway::signaling::{CallSignaling, SignalEvent};

use common::FakePeerFactory;

const CAND_1: &str = "candidate:1 1 UDP 100 10.0.0.1 5001 typ host";
const CAND_2: &str = "candidate:2 1 UDP 90 10.0.0.2 5002 typ host";
const CAND_3: &str = "candidate:3 1 UDP 80 10.0.0.3 5003 typ host";

fn setup() -> (PeerCallManager, FakePeerFactory, CallSignaling) {
    let factory = FakePeerFactory::new();
    let manager = PeerCallManager::new(Box::new(FakePeerFactory {
        added: Arc::clone(&factory.added),
        closed: Arc::clone(&factory.closed),
    }));
    let store: Arc<dyn SignalStore> = Arc::new(MemoryStore::new());
    let signaling = CallSignaling::new(store, "alpha".to_string());
    (manager, factory, signaling)
}

fn candidate_event(session: &str, candidate: &str) -> SignalEvent {
    SignalEvent::CandidateReceived {
        session_id: session.to_string(),
        candidate: candidate.to_string(),
    }
}

#[tokio::test]
async fn early_candidates_are_queued_then_flushed_in_order() {
    let (mut manager, factory, mut signaling) = setup();

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    let session = manager.session_id().unwrap().to_string();
    assert!(matches!(manager.state(), CallState::OfferSent { .. }));

    // candidates before the answer are held back
    manager
        .handle_event(&candidate_event(&session, CAND_1), &mut signaling)
        .await
        .unwrap();
    manager
        .handle_event(&candidate_event(&session, CAND_2), &mut signaling)
        .await
        .unwrap();
    assert_eq!(manager.pending_candidates(), 2);
    assert!(factory.added.lock().unwrap().is_empty());

    manager
        .handle_event(
            &SignalEvent::AnswerReceived {
                session_id: session.clone(),
                sdp: "answer-sdp".to_string(),
            },
            &mut signaling,
        )
        .await
        .unwrap();

    assert_eq!(manager.state(), CallState::Connected);
    assert_eq!(manager.pending_candidates(), 0);
    assert_eq!(
        *factory.added.lock().unwrap(),
        vec![CAND_1.to_string(), CAND_2.to_string()]
    );

    // after the flush, candidates apply directly
    manager
        .handle_event(&candidate_event(&session, CAND_3), &mut signaling)
        .await
        .unwrap();
    assert_eq!(factory.added.lock().unwrap().len(), 3);
    assert_eq!(factory.added.lock().unwrap()[2], CAND_3);
}

#[tokio::test]
async fn malformed_candidates_are_dropped_not_fatal() {
    let (mut manager, factory, mut signaling) = setup();

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    let session = manager.session_id().unwrap().to_string();

    manager
        .handle_event(&candidate_event(&session, "not a candidate"), &mut signaling)
        .await
        .unwrap();
    assert_eq!(manager.pending_candidates(), 0);
    assert!(factory.added.lock().unwrap().is_empty());
    assert!(manager.is_active());
}

#[tokio::test]
async fn candidates_for_other_sessions_are_ignored() {
    let (mut manager, factory, mut signaling) = setup();

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    manager
        .handle_event(&candidate_event("someone_else_123", CAND_1), &mut signaling)
        .await
        .unwrap();
    assert_eq!(manager.pending_candidates(), 0);
    assert!(factory.added.lock().unwrap().is_empty());
}

#[tokio::test]
async fn callee_answers_an_accepted_offer() {
    let (mut manager, _factory, _) = setup();

    // bravo called us; the record exists before we accept
    let store: Arc<dyn SignalStore> = Arc::new(MemoryStore::new());
    let mut caller_side = CallSignaling::new(Arc::clone(&store), "bravo".to_string());
    let session = caller_side.create_call("alpha").await.unwrap();
    caller_side.send_offer(&session, "offer-sdp").await.unwrap();

    let mut signaling_on_store = CallSignaling::new(store, "alpha".to_string());
    manager
        .accept_call(&mut signaling_on_store, &session)
        .await
        .unwrap();
    assert_eq!(manager.state(), CallState::Answering);

    manager
        .handle_event(
            &SignalEvent::OfferReceived {
                session_id: session.clone(),
                sdp: "offer-sdp".to_string(),
            },
            &mut signaling_on_store,
        )
        .await
        .unwrap();
    assert_eq!(manager.state(), CallState::Connected);

    // the answer reached the caller through the store
    let events = caller_side.poll_once().await.unwrap();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, SignalEvent::AnswerReceived { .. }))
    );
}

#[tokio::test]
async fn ring_timeout_applies_only_while_ringing() {
    let (mut manager, _factory, mut signaling) = setup();
    let timeout = Duration::from_secs(60);

    assert!(!manager.ring_timed_out(Instant::now(), timeout));

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    let session = manager.session_id().unwrap().to_string();
    let now = Instant::now();
    assert!(!manager.ring_timed_out(now + Duration::from_secs(59), timeout));
    assert!(manager.ring_timed_out(now + Duration::from_secs(61), timeout));

    manager
        .handle_event(
            &SignalEvent::AnswerReceived {
                session_id: session,
                sdp: "answer-sdp".to_string(),
            },
            &mut signaling,
        )
        .await
        .unwrap();
    assert!(!manager.ring_timed_out(now + Duration::from_secs(3600), timeout));
}

#[tokio::test]
async fn remote_hangup_tears_down_without_echoing() {
    let (mut manager, factory, mut signaling) = setup();

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    let session = manager.session_id().unwrap().to_string();

    manager
        .handle_event(
            &SignalEvent::CallEnded {
                session_id: session,
                status: pendant_gateway::signaling::CallStatus::Ended,
            },
            &mut signaling,
        )
        .await
        .unwrap();

    assert_eq!(manager.state(), CallState::Idle);
    assert!(factory.closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(manager.session_id().is_none());
}

#[tokio::test]
async fn end_call_is_idempotent() {
    let (mut manager, _factory, mut signaling) = setup();

    manager.end_call(&mut signaling).await.unwrap();

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    manager.end_call(&mut signaling).await.unwrap();
    assert!(!manager.is_active());
    manager.end_call(&mut signaling).await.unwrap();
}

#[tokio::test]
async fn second_call_while_active_is_refused() {
    let (mut manager, _factory, mut signaling) = setup();

    manager.start_call(&mut signaling, "bravo").await.unwrap();
    assert!(manager.start_call(&mut signaling, "charlie").await.is_err());
    assert!(
        manager
            .accept_call(&mut signaling, "some_session")
            .await
            .is_err()
    );
}
