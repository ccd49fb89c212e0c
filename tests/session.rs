//! Session lifecycle: reconnect accounting, idle reset, tool dispatch

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use pendant_gateway::audio::{PlaybackHandle, Resampler};
use pendant_gateway::capabilities::{Capability, CapabilityRegistry, CapabilityResult};
use pendant_gateway::session::events::ServerEvent;
use pendant_gateway::session::transport::ChannelRemote;
use pendant_gateway::session::{Activity, ConnectionState, SessionClient};
use pendant_gateway::{Error, Result};

use common::{FlakyConnector, session_config};

struct FailingCapability;

#[async_trait]
impl Capability for FailingCapability {
    fn name(&self) -> &str {
        "broken_tool"
    }

    fn description(&self) -> &str {
        "always fails"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<CapabilityResult> {
        Err(Error::Capability("internal wiring detail".to_string()))
    }
}

struct RecordingCapability;

#[async_trait]
impl Capability for RecordingCapability {
    fn name(&self) -> &str {
        "voice_message_send"
    }

    fn description(&self) -> &str {
        "records a voice message"
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> Result<CapabilityResult> {
        Ok(CapabilityResult::ok("recording armed")
            .with_data(json!({ "start_voice_recording": true })))
    }
}

fn spawn_event_loop(
    client: &Arc<SessionClient>,
    registry: Arc<CapabilityRegistry>,
) -> mpsc::UnboundedReceiver<pendant_gateway::EngineCommand> {
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();
    tokio::spawn(Arc::clone(client).run_events(
        registry,
        PlaybackHandle::spawn(48_000),
        Resampler::new(24_000, 48_000),
        engine_tx,
    ));
    engine_rx
}

async fn next_frame(remote: &mut ChannelRemote) -> Value {
    tokio::time::timeout(Duration::from_secs(1), remote.sent.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("transport closed")
}

#[tokio::test]
async fn failed_connects_count_attempts_and_grow_backoff() {
    let (connector, _remotes) = FlakyConnector::new(u32::MAX);
    let client = SessionClient::new(session_config(), Box::new(connector));

    assert_eq!(client.next_backoff(), Some(Duration::from_secs(1)));

    assert!(client.connect(&[]).await.is_err());
    assert_eq!(client.reconnect_attempts(), 1);
    assert_eq!(client.next_backoff(), Some(Duration::from_secs(2)));

    assert!(client.connect(&[]).await.is_err());
    assert_eq!(client.next_backoff(), Some(Duration::from_secs(4)));

    assert!(client.connect(&[]).await.is_err());
    assert_eq!(client.next_backoff(), Some(Duration::from_secs(8)));
}

#[tokio::test]
async fn reconnects_stop_after_the_attempt_limit() {
    let (connector, _remotes) = FlakyConnector::new(u32::MAX);
    let client = SessionClient::new(session_config(), Box::new(connector));

    for _ in 0..5 {
        assert!(client.next_backoff().is_some());
        assert!(client.connect(&[]).await.is_err());
    }

    // the fifth failure exhausts the limit; no sixth attempt is offered
    assert_eq!(client.reconnect_attempts(), 5);
    assert_eq!(client.next_backoff(), None);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn successful_inbound_event_resets_the_attempt_counter() {
    let (connector, mut remotes) = FlakyConnector::new(3);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));

    for _ in 0..3 {
        assert!(client.connect(&[]).await.is_err());
    }
    assert_eq!(client.reconnect_attempts(), 3);

    tokio_test::assert_ok!(client.connect(&[]).await);
    assert!(client.is_connected());
    // connecting alone does not clear the counter
    assert_eq!(client.reconnect_attempts(), 3);

    let mut remote = remotes.recv().await.unwrap();
    let handshake = next_frame(&mut remote).await;
    assert_eq!(handshake["type"], "session.update");

    let _engine_rx = spawn_event_loop(&client, Arc::new(CapabilityRegistry::new()));
    remote.events.send(Ok(ServerEvent::ResponseDone)).unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while client.reconnect_attempts() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("attempt counter never reset");
}

#[tokio::test]
async fn idle_reset_waits_for_the_window_and_voice_message_mode() {
    let (connector, mut remotes) = FlakyConnector::new(0);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));
    client.connect(&[]).await.unwrap();

    let mut remote = remotes.recv().await.unwrap();
    let _handshake = next_frame(&mut remote).await;

    // no response yet, nothing to reset from
    assert!(!client.should_reset(Instant::now() + Duration::from_secs(3600)));

    let _engine_rx = spawn_event_loop(&client, Arc::new(CapabilityRegistry::new()));
    remote.events.send(Ok(ServerEvent::ResponseDone)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let now = Instant::now();
    assert!(!client.should_reset(now));
    assert!(client.should_reset(now + Duration::from_secs(31)));

    // an armed voice-message window blocks the reset
    client.arm_voice_message();
    assert!(!client.should_reset(now + Duration::from_secs(31)));

    client.clear_voice_message();
    assert!(client.should_reset(now + Duration::from_secs(31)));
}

#[tokio::test]
async fn activity_tracks_the_turn_lifecycle() {
    let (connector, mut remotes) = FlakyConnector::new(0);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));
    client.connect(&[]).await.unwrap();
    assert_eq!(
        client.connection_state(),
        ConnectionState::Connected(Activity::Idle)
    );

    let mut remote = remotes.recv().await.unwrap();
    let _handshake = next_frame(&mut remote).await;

    client.activity_start().await.unwrap();
    assert_eq!(
        client.connection_state(),
        ConnectionState::Connected(Activity::Recording)
    );
    let clear = next_frame(&mut remote).await;
    assert_eq!(clear["type"], "input_audio_buffer.clear");

    client.activity_end().await.unwrap();
    assert_eq!(
        client.connection_state(),
        ConnectionState::Connected(Activity::AwaitingResponse)
    );

    let _engine_rx = spawn_event_loop(&client, Arc::new(CapabilityRegistry::new()));
    remote.events.send(Ok(ServerEvent::ResponseDone)).unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while client.connection_state() != ConnectionState::Connected(Activity::Idle) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("turn never completed");
}

#[tokio::test]
async fn voice_message_window_expires() {
    let (connector, _remotes) = FlakyConnector::new(0);
    let client = SessionClient::new(session_config(), Box::new(connector));

    client.arm_voice_message();
    let now = Instant::now();
    assert!(client.voice_message_active(now));
    assert!(!client.expire_voice_message(now));

    let later = now + Duration::from_secs(61);
    assert!(!client.voice_message_active(later));
    assert!(client.expire_voice_message(later));
    // already cleared
    assert!(!client.expire_voice_message(later));
}

#[tokio::test]
async fn failing_tool_yields_a_generic_result_and_the_session_survives() {
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(FailingCapability));

    let (connector, mut remotes) = FlakyConnector::new(0);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));
    client.connect(&registry.tool_definitions()).await.unwrap();

    let mut remote = remotes.recv().await.unwrap();
    let _handshake = next_frame(&mut remote).await;

    let _engine_rx = spawn_event_loop(&client, Arc::new(registry));
    remote
        .events
        .send(Ok(ServerEvent::ToolCall {
            call_id: "call-1".to_string(),
            name: "broken_tool".to_string(),
            arguments: "{}".to_string(),
        }))
        .unwrap();

    let output = next_frame(&mut remote).await;
    assert_eq!(output["type"], "conversation.item.create");
    assert_eq!(output["item"]["call_id"], "call-1");

    let payload: Value =
        serde_json::from_str(output["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(payload["success"], false);
    // the raw error never reaches the model
    assert!(!payload["message"].as_str().unwrap().contains("wiring"));

    let follow_up = next_frame(&mut remote).await;
    assert_eq!(follow_up["type"], "response.create");

    assert!(client.is_connected());
    client.send_text_message("still alive?").await.unwrap();
    let text = next_frame(&mut remote).await;
    assert_eq!(text["type"], "conversation.item.create");
}

#[tokio::test]
async fn tool_result_flag_arms_voice_message_mode() {
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(RecordingCapability));

    let (connector, mut remotes) = FlakyConnector::new(0);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));
    client.connect(&registry.tool_definitions()).await.unwrap();

    let mut remote = remotes.recv().await.unwrap();
    let _handshake = next_frame(&mut remote).await;

    assert!(!client.voice_message_active(Instant::now()));

    let _engine_rx = spawn_event_loop(&client, Arc::new(registry));
    remote
        .events
        .send(Ok(ServerEvent::ToolCall {
            call_id: "call-2".to_string(),
            name: "voice_message_send".to_string(),
            arguments: "{}".to_string(),
        }))
        .unwrap();

    let _output = next_frame(&mut remote).await;
    assert!(client.voice_message_active(Instant::now()));
}

#[tokio::test]
async fn backend_error_events_do_not_tear_down_the_session() {
    let (connector, mut remotes) = FlakyConnector::new(0);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));
    client.connect(&[]).await.unwrap();

    let mut remote = remotes.recv().await.unwrap();
    let _handshake = next_frame(&mut remote).await;

    let _engine_rx = spawn_event_loop(&client, Arc::new(CapabilityRegistry::new()));
    remote
        .events
        .send(Ok(ServerEvent::Error {
            message: "input_audio_buffer_commit_empty".to_string(),
        }))
        .unwrap();

    // the loop keeps draining: the next event is still dispatched
    remote.events.send(Ok(ServerEvent::ResponseDone)).unwrap();
    let later = Instant::now() + Duration::from_secs(31);
    tokio::time::timeout(Duration::from_secs(1), async {
        while !client.should_reset(later) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("event after the error was never processed");

    assert!(client.is_connected());
    assert!(!client.needs_reconnect());
    client.send_text_message("still here").await.unwrap();
    let text = next_frame(&mut remote).await;
    assert_eq!(text["type"], "conversation.item.create");
}

#[tokio::test]
async fn transport_loss_flags_reconnect() {
    let (connector, mut remotes) = FlakyConnector::new(0);
    let client = Arc::new(SessionClient::new(session_config(), Box::new(connector)));
    client.connect(&[]).await.unwrap();

    let remote = remotes.recv().await.unwrap();
    assert!(!client.needs_reconnect());

    let _engine_rx = spawn_event_loop(&client, Arc::new(CapabilityRegistry::new()));
    drop(remote);

    tokio::time::timeout(Duration::from_secs(1), async {
        while !client.needs_reconnect() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("reconnect flag never set");
}
