//! Realtime conversation session
//!
//! [`SessionClient`] owns the connection to the conversational backend: the
//! connect/reconnect state machine, the push-to-talk audio framing, tool
//! dispatch, and voice-message mode. All mutable state lives in one struct
//! behind a mutex; the transport handle is shared so the engine can send
//! audio while the event loop drains inbound events.
//!
//! Reconnection uses exponential backoff capped at 60 seconds. The attempt
//! counter resets on every successful inbound event and reconnection stops
//! for good once the configured limit is reached. An idle session (no
//! response activity within the reset window) is torn down and re-established
//! with a fresh handshake; this is routine maintenance, not an error.

pub mod events;
pub mod transport;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};

use self::events::ServerEvent;
use self::transport::{Connector, Transport};
use crate::audio::{PlaybackHandle, Resampler};
use crate::capabilities::{CapabilityRegistry, CapabilityResult};
use crate::config::SessionConfig;
use crate::engine::EngineCommand;
use crate::{Error, Result};

/// Hard cap on reconnect backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// What a connected session is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Waiting for the user
    Idle,
    /// The user is holding the button and audio is streaming up
    Recording,
    /// A response has been requested and is being produced
    AwaitingResponse,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(Activity),
}

/// Mutable session state, owned by the client behind one lock
#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    reconnect_attempts: u32,
    last_response: Option<Instant>,
    voice_message_started: Option<Instant>,
    needs_reconnect: bool,
    suspended: bool,
}

/// Client for the realtime conversation backend
pub struct SessionClient {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    state: Mutex<SessionState>,
}

/// Backoff before reconnect attempt number `attempts` (zero-based):
/// `base^attempts` seconds, capped at one minute
#[must_use]
pub fn backoff_delay(attempts: u32, base_secs: f64) -> Duration {
    let raw = base_secs.powi(i32::try_from(attempts).unwrap_or(i32::MAX));
    // large exponents overflow f64; cap before converting to a Duration
    if !raw.is_finite() || raw >= MAX_BACKOFF.as_secs_f64() {
        return MAX_BACKOFF;
    }
    Duration::from_secs_f64(raw)
}

impl SessionClient {
    /// Create a client; no connection is made until [`connect`](Self::connect)
    #[must_use]
    pub fn new(config: SessionConfig, connector: Box<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            transport: RwLock::new(None),
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                reconnect_attempts: 0,
                last_response: None,
                voice_message_started: None,
                needs_reconnect: false,
                suspended: false,
            }),
        }
    }

    /// Establish the connection and send the session handshake.
    ///
    /// A failed attempt increments the reconnect counter; the caller decides
    /// whether to retry via [`next_backoff`](Self::next_backoff).
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot connect or the handshake
    /// cannot be sent.
    pub async fn connect(&self, tools: &[Value]) -> Result<()> {
        self.with_state(|s| s.connection = ConnectionState::Connecting);

        let transport = match self.connector.connect().await {
            Ok(t) => t,
            Err(e) => {
                self.with_state(|s| {
                    s.connection = ConnectionState::Disconnected;
                    s.reconnect_attempts += 1;
                });
                return Err(e);
            }
        };

        let transport: Arc<dyn Transport> = Arc::from(transport);
        transport
            .send(events::session_update(&self.config, tools))
            .await?;

        *self.transport.write().await = Some(transport);
        self.with_state(|s| {
            s.connection = ConnectionState::Connected(Activity::Idle);
            s.needs_reconnect = false;
        });

        tracing::info!(model = %self.config.model, "session connected");
        Ok(())
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        if let Some(transport) = self.transport.write().await.take() {
            transport.close().await;
        }
        self.with_state(|s| s.connection = ConnectionState::Disconnected);
    }

    /// Tear down and re-establish the session with a fresh handshake.
    ///
    /// Voice-message mode survives a reset; response history does not.
    ///
    /// # Errors
    ///
    /// Returns an error if the new connection fails.
    pub async fn reset_session(&self, tools: &[Value]) -> Result<()> {
        tracing::info!("resetting session");
        self.disconnect().await;
        self.with_state(|s| s.last_response = None);
        self.connect(tools).await
    }

    /// Whether the session is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.with_state(|s| matches!(s.connection, ConnectionState::Connected(_)))
    }

    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.with_state(|s| s.connection)
    }

    /// Failed reconnect attempts since the last successful inbound event
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.with_state(|s| s.reconnect_attempts)
    }

    /// Backoff before the next reconnect attempt, or `None` when the limit
    /// is exhausted and the session will not recover
    #[must_use]
    pub fn next_backoff(&self) -> Option<Duration> {
        let attempts = self.reconnect_attempts();
        if attempts >= self.config.max_reconnect_attempts {
            return None;
        }
        Some(backoff_delay(attempts, self.config.reconnect_base_secs))
    }

    /// Whether the event loop flagged the connection for reconnection
    #[must_use]
    pub fn needs_reconnect(&self) -> bool {
        self.with_state(|s| s.needs_reconnect)
    }

    /// Flag the connection for reconnection
    pub fn mark_needs_reconnect(&self) {
        self.with_state(|s| s.needs_reconnect = true);
    }

    /// Whether the idle-reset conditions hold at `now`: connected, a
    /// response has been seen, the reset window has elapsed, and
    /// voice-message mode is not active
    #[must_use]
    pub fn should_reset(&self, now: Instant) -> bool {
        self.with_state(|s| {
            matches!(s.connection, ConnectionState::Connected(_))
                && s.voice_message_started.is_none()
                && s.last_response.is_some_and(|t| {
                    now.saturating_duration_since(t)
                        >= Duration::from_secs(self.config.reset_timeout_secs)
                })
        })
    }

    /// Arm voice-message mode
    pub fn arm_voice_message(&self) {
        tracing::info!("voice message mode armed");
        self.with_state(|s| s.voice_message_started = Some(Instant::now()));
    }

    /// Whether voice-message mode is armed and unexpired at `now`
    #[must_use]
    pub fn voice_message_active(&self, now: Instant) -> bool {
        let timeout = Duration::from_secs(self.config.voice_message_timeout_secs);
        self.with_state(|s| {
            s.voice_message_started
                .is_some_and(|t| now.saturating_duration_since(t) < timeout)
        })
    }

    /// Clear an expired voice-message window; returns `true` if one expired
    pub fn expire_voice_message(&self, now: Instant) -> bool {
        let timeout = Duration::from_secs(self.config.voice_message_timeout_secs);
        self.with_state(|s| {
            if s.voice_message_started
                .is_some_and(|t| now.saturating_duration_since(t) >= timeout)
            {
                s.voice_message_started = None;
                true
            } else {
                false
            }
        })
    }

    /// Disarm voice-message mode
    pub fn clear_voice_message(&self) {
        self.with_state(|s| s.voice_message_started = None);
    }

    /// Suspend audio exchange (during calls); inbound deltas are dropped
    pub fn set_suspended(&self, suspended: bool) {
        self.with_state(|s| s.suspended = suspended);
    }

    /// Whether audio exchange is suspended
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.with_state(|s| s.suspended)
    }

    /// Upload one chunk of captured audio.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub async fn send_audio_chunk(&self, samples: &[i16]) -> Result<()> {
        self.send(events::audio_append(samples)).await
    }

    /// Open the user's turn, clearing any stale input audio.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub async fn activity_start(&self) -> Result<()> {
        self.send(events::audio_clear()).await?;
        self.set_activity(Activity::Recording);
        Ok(())
    }

    /// Close the user's turn and request a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub async fn activity_end(&self) -> Result<()> {
        self.send(events::audio_commit()).await?;
        self.send(events::response_create()).await?;
        self.set_activity(Activity::AwaitingResponse);
        Ok(())
    }

    /// Inject a user-role text message and request a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub async fn send_text_message(&self, text: &str) -> Result<()> {
        self.send(events::user_text_message(text)).await?;
        self.send(events::response_create()).await
    }

    /// Deliver a tool result under its original call id and request a
    /// follow-up response. Arms voice-message mode when the result asks
    /// for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not connected.
    pub async fn send_tool_result(
        &self,
        call_id: &str,
        result: &CapabilityResult,
    ) -> Result<()> {
        if result.requests_voice_recording() {
            self.arm_voice_message();
        }
        self.send(events::function_call_output(call_id, &result.to_output_json()))
            .await?;
        self.send(events::response_create()).await
    }

    /// Drain inbound events until the stream closes or errors.
    ///
    /// Returns normally when the connection ends; the reconnect flag is set
    /// for the engine to act on.
    pub async fn run_events(
        self: Arc<Self>,
        registry: Arc<CapabilityRegistry>,
        playback: PlaybackHandle,
        resampler: Resampler,
        engine_tx: mpsc::UnboundedSender<EngineCommand>,
    ) {
        let transport = { self.transport.read().await.clone() };
        let Some(transport) = transport else {
            return;
        };

        let mut speaking = false;

        loop {
            let Some(event) = transport.recv().await else {
                tracing::info!("event stream closed");
                break;
            };

            match event {
                Ok(event) => {
                    self.with_state(|s| s.reconnect_attempts = 0);
                    self.dispatch_event(event, &registry, &playback, resampler, &engine_tx, &mut speaking)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport error");
                    break;
                }
            }
        }

        self.mark_needs_reconnect();
    }

    async fn dispatch_event(
        self: &Arc<Self>,
        event: ServerEvent,
        registry: &Arc<CapabilityRegistry>,
        playback: &PlaybackHandle,
        resampler: Resampler,
        engine_tx: &mpsc::UnboundedSender<EngineCommand>,
        speaking: &mut bool,
    ) {
        match event {
            ServerEvent::SessionCreated => {
                tracing::debug!("backend session created");
            }
            ServerEvent::AudioDelta { samples } => {
                if self.is_suspended() {
                    return;
                }
                if !*speaking {
                    *speaking = true;
                    let _ = engine_tx.send(EngineCommand::AssistantSpeaking);
                }
                playback.enqueue(&resampler.process(&samples));
            }
            ServerEvent::InputTranscript { text } => {
                tracing::info!(role = "user", %text, "transcript");
            }
            ServerEvent::OutputTranscript { text } => {
                tracing::info!(role = "assistant", %text, "transcript");
            }
            ServerEvent::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                self.handle_tool_call(call_id, name, &arguments, registry)
                    .await;
            }
            ServerEvent::ResponseDone => {
                *speaking = false;
                self.set_activity(Activity::Idle);
                self.with_state(|s| s.last_response = Some(Instant::now()));
            }
            ServerEvent::Error { message } => {
                // protocol-level errors (an empty audio commit, a bad event)
                // do not invalidate the connection
                tracing::warn!(%message, "backend reported an error");
            }
            ServerEvent::Other { kind } => {
                tracing::trace!(%kind, "ignoring event");
            }
        }
    }

    async fn handle_tool_call(
        self: &Arc<Self>,
        call_id: String,
        name: String,
        arguments: &str,
        registry: &Arc<CapabilityRegistry>,
    ) {
        let args: Value = serde_json::from_str(arguments).unwrap_or_else(|_| json!({}));
        tracing::info!(capability = %name, %call_id, "tool call");

        if registry.is_slow(&name) {
            // blocking capabilities run off the event loop; the result is
            // delivered later under the same call id
            let client = Arc::clone(self);
            let registry = Arc::clone(registry);
            tokio::spawn(async move {
                let result = registry.execute(&name, args).await;
                if let Err(e) = client.send_tool_result(&call_id, &result).await {
                    tracing::warn!(error = %e, %call_id, "failed to deliver tool result");
                }
            });
        } else {
            let result = registry.execute(&name, args).await;
            if let Err(e) = self.send_tool_result(&call_id, &result).await {
                tracing::warn!(error = %e, %call_id, "failed to deliver tool result");
            }
        }
    }

    async fn send(&self, event: Value) -> Result<()> {
        let transport = { self.transport.read().await.clone() };
        let transport =
            transport.ok_or_else(|| Error::Session("not connected".to_string()))?;
        transport.send(event).await
    }

    fn set_activity(&self, activity: Activity) {
        self.with_state(|s| {
            if matches!(s.connection, ConnectionState::Connected(_)) {
                s.connection = ConnectionState::Connected(activity);
            }
        });
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }
}
