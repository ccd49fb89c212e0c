//! Top-level orchestrator
//!
//! [`Engine`] wires the session client, signaling poller, call manager,
//! audio pipeline, and capability registry together and runs the main
//! loop. Everything reaches the engine through channels: capabilities send
//! [`EngineCommand`]s, the input thread sends button/audio events, and the
//! signaling poller sends [`SignalEvent`]s. Timeouts (idle reset, ring
//! timeout, voice-message expiry) are timestamp checks on a 100ms tick,
//! never blocking sleeps.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::arbiter::{ArbiterAction, AudioArbiter, AudioOwner};
use crate::audio::{AudioCapture, MusicPlayer, PlaybackHandle, Resampler, chime, samples_to_wav};
use crate::button::{self, TalkButton};
use crate::call::PeerCallManager;
use crate::call::peer::{PeerConnectionFactory, UnavailablePeerFactory};
use crate::capabilities::{CapabilityRegistry, builtin};
use crate::config::Config;
use crate::session::SessionClient;
use crate::session::transport::{Connector, WsConnector};
use crate::signaling::store::{MemoryStore, RestStore, SignalStore};
use crate::signaling::{CallSignaling, SignalEvent};
use crate::{Error, Result};

/// Main loop cadence
const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Button poll cadence on the input thread
const INPUT_POLL_PERIOD: Duration = Duration::from_millis(10);

/// Recordings shorter than this many chunks are accidental presses
const MIN_VOICE_MESSAGE_CHUNKS: usize = 5;

/// Longest voice message, in seconds of audio
const MAX_VOICE_MESSAGE_SECS: usize = 60;

/// Longest wait for a chime to finish before the speaker changes hands
const CHIME_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Command sent to the engine loop by capabilities and internal tasks
#[derive(Debug)]
pub enum EngineCommand {
    /// Place a call; falls back to the configured default peer
    StartCall { peer: Option<String> },
    /// Hang up the active call
    EndCall,
    /// Start music playback
    PlayMusic { query: String },
    /// Stop music playback
    StopMusic,
    /// Pause or resume music
    TogglePauseMusic,
    /// The assistant started speaking; conversation takes the speaker
    AssistantSpeaking,
    /// Inject a user-role text message (reminders, notifications)
    SendText { text: String },
    /// Stop the engine
    Shutdown,
}

/// Event from the input thread
#[derive(Debug)]
enum InputEvent {
    PressStarted,
    /// One chunk of captured audio, already at the send rate
    AudioChunk(Vec<i16>),
    PressEnded,
}

/// Receives recorded voice messages for delivery
#[async_trait]
pub trait VoiceMessageSink: Send + Sync {
    /// Deliver a recorded message as WAV bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    async fn deliver(&self, wav: Vec<u8>) -> Result<()>;
}

/// Cheap handle onto a running engine for state queries and commands
#[derive(Clone)]
pub struct EngineHandle {
    session: Arc<SessionClient>,
    in_call: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    /// Whether the realtime session is connected
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Whether a peer call is in progress
    #[must_use]
    pub fn is_in_call(&self) -> bool {
        self.in_call.load(Ordering::Relaxed)
    }

    /// Send a command to the engine loop
    pub fn send(&self, command: EngineCommand) {
        let _ = self.commands.send(command);
    }
}

/// The assembled gateway
pub struct Engine {
    config: Config,
    session: Arc<SessionClient>,
    registry: Arc<CapabilityRegistry>,
    signaling: Arc<tokio::sync::Mutex<CallSignaling>>,
    call: PeerCallManager,
    arbiter: AudioArbiter,
    music: MusicPlayer,
    playback: PlaybackHandle,
    voice_sink: Option<Arc<dyn VoiceMessageSink>>,
    in_call: Arc<AtomicBool>,
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    cmd_rx: Option<mpsc::UnboundedReceiver<EngineCommand>>,
    event_task: Option<JoinHandle<()>>,
    tools: Vec<Value>,
    recording: bool,
    recorded: Vec<i16>,
    recorded_chunks: usize,
}

impl Engine {
    /// Assemble an engine from configuration with the default bindings:
    /// WebSocket transport, REST signaling store (in-memory when no store
    /// URL is configured), no media stack, no voice-message sink.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let connector: Box<dyn Connector> = Box::new(WsConnector::new(&config.session));
        let store: Arc<dyn SignalStore> = if config.signaling.base_url.is_empty() {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(RestStore::new(&config.signaling.base_url))
        };
        Self::with_bindings(config, connector, store, Box::new(UnavailablePeerFactory))
    }

    /// Assemble an engine with explicit transport, store, and media
    /// bindings (tests, embedded setups)
    #[must_use]
    pub fn with_bindings(
        config: Config,
        connector: Box<dyn Connector>,
        store: Arc<dyn SignalStore>,
        peer_factory: Box<dyn PeerConnectionFactory>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(builtin::StartCallCapability::new(cmd_tx.clone())));
        registry.register(Arc::new(builtin::EndCallCapability::new(cmd_tx.clone())));
        registry.register(Arc::new(builtin::PlayMusicCapability::new(cmd_tx.clone())));
        registry.register(Arc::new(builtin::StopMusicCapability::new(cmd_tx.clone())));
        registry.register(Arc::new(builtin::PauseMusicCapability::new(cmd_tx.clone())));
        registry.register(Arc::new(builtin::VoiceMessageCapability));

        let session = Arc::new(SessionClient::new(config.session.clone(), connector));
        let signaling = Arc::new(tokio::sync::Mutex::new(CallSignaling::new(
            store,
            config.device_id.clone(),
        )));
        let playback = PlaybackHandle::spawn(config.audio.playback_rate);
        let music = MusicPlayer::new(config.music.player.clone());

        Self {
            config,
            session,
            registry: Arc::new(registry),
            signaling,
            call: PeerCallManager::new(peer_factory),
            arbiter: AudioArbiter::new(),
            music,
            playback,
            voice_sink: None,
            in_call: Arc::new(AtomicBool::new(false)),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            event_task: None,
            tools: Vec::new(),
            recording: false,
            recorded: Vec::new(),
            recorded_chunks: 0,
        }
    }

    /// Attach a voice-message sink
    #[must_use]
    pub fn with_voice_sink(mut self, sink: Arc<dyn VoiceMessageSink>) -> Self {
        self.voice_sink = Some(sink);
        self
    }

    /// Register an additional capability. Only possible before [`run`](Self::run)
    /// clones the registry for the event loop.
    pub fn register_capability(&mut self, capability: Arc<dyn crate::capabilities::Capability>) {
        if let Some(registry) = Arc::get_mut(&mut self.registry) {
            registry.register(capability);
        } else {
            tracing::warn!("capability registered after startup, ignoring");
        }
    }

    /// Sender for external command producers (schedulers, shells)
    #[must_use]
    pub fn command_sender(&self) -> mpsc::UnboundedSender<EngineCommand> {
        self.cmd_tx.clone()
    }

    /// Handle for state queries while the engine runs
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            session: Arc::clone(&self.session),
            in_call: Arc::clone(&self.in_call),
            commands: self.cmd_tx.clone(),
        }
    }

    /// Run until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when startup fails or reconnection is exhausted.
    pub async fn run(mut self) -> Result<()> {
        self.tools = self.registry.tool_definitions();

        self.ensure_connected().await?;

        // conversation owns the speaker from the start
        let actions = self.arbiter.acquire(AudioOwner::Conversation);
        self.apply(actions).await;
        self.playback
            .enqueue(&chime::startup_chime(self.config.audio.playback_rate));

        let mut cmd_rx = self.cmd_rx.take().ok_or_else(|| {
            Error::Session("engine already ran".to_string())
        })?;

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        spawn_input_thread(&self.config, input_tx, Arc::clone(&shutdown_flag));

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let poller = spawn_signal_poller(
            Arc::clone(&self.signaling),
            Duration::from_millis(self.config.signaling.poll_interval_ms),
            signal_tx,
        );

        let ctrl_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = ctrl_tx.send(EngineCommand::Shutdown);
            }
        });

        tracing::info!(device_id = %self.config.device_id, "pendant gateway running");

        let mut tick = tokio::time::interval(TICK_PERIOD);
        let result = loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.on_tick().await {
                        break Err(e);
                    }
                }
                Some(command) = cmd_rx.recv() => {
                    if matches!(command, EngineCommand::Shutdown) {
                        tracing::info!("shutting down");
                        break Ok(());
                    }
                    self.on_command(command).await;
                }
                Some(event) = input_rx.recv() => {
                    self.on_input(event).await;
                }
                Some(event) = signal_rx.recv() => {
                    self.on_signal(event).await;
                }
            }
        };

        shutdown_flag.store(true, Ordering::Relaxed);
        poller.abort();
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.hang_up().await;
        self.music.stop().await;
        self.session.disconnect().await;
        self.playback.shutdown();

        result
    }

    /// Reconnect (or connect) with backoff until the attempt limit
    async fn ensure_connected(&mut self) -> Result<()> {
        if self.session.is_connected() && !self.session.needs_reconnect() {
            return Ok(());
        }

        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.session.disconnect().await;

        loop {
            let Some(delay) = self.session.next_backoff() else {
                return Err(Error::ReconnectExhausted(self.session.reconnect_attempts()));
            };
            if !delay.is_zero() && self.session.reconnect_attempts() > 0 {
                tracing::info!(
                    attempt = self.session.reconnect_attempts(),
                    delay_secs = delay.as_secs(),
                    "reconnecting after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match self.session.connect(&self.tools).await {
                Ok(()) => {
                    self.spawn_event_loop();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed");
                }
            }
        }
    }

    fn spawn_event_loop(&mut self) {
        let resampler = Resampler::new(
            self.config.audio.receive_rate,
            self.config.audio.playback_rate,
        );
        self.event_task = Some(tokio::spawn(Arc::clone(&self.session).run_events(
            Arc::clone(&self.registry),
            self.playback.clone(),
            resampler,
            self.cmd_tx.clone(),
        )));
    }

    async fn on_tick(&mut self) -> Result<()> {
        let now = Instant::now();

        if self.session.expire_voice_message(now) {
            tracing::info!("voice message window expired");
        }

        if self.session.needs_reconnect() {
            self.ensure_connected().await?;
        }

        if self.session.should_reset(now) && !self.call.is_active() {
            self.reset_session().await;
        }

        if self
            .call
            .ring_timed_out(now, Duration::from_secs(self.config.signaling.ring_timeout_secs))
        {
            tracing::info!("outgoing call unanswered, giving up");
            self.hang_up().await;
        }

        // notice when the music process exits on its own
        if self.arbiter.owner() == Some(AudioOwner::Music) && !self.music.is_playing() {
            let actions = self.arbiter.release(AudioOwner::Music);
            self.apply(actions).await;
        }

        Ok(())
    }

    async fn reset_session(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        match self.session.reset_session(&self.tools).await {
            Ok(()) => self.spawn_event_loop(),
            Err(e) => {
                tracing::warn!(error = %e, "session reset failed, will reconnect");
                self.session.mark_needs_reconnect();
            }
        }
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::StartCall { peer } => {
                let Some(callee) = peer.or_else(|| self.config.default_peer.clone()) else {
                    tracing::warn!("no peer to call and no default configured");
                    return;
                };
                self.begin_call_audio().await;
                let signaling = Arc::clone(&self.signaling);
                let outcome = {
                    let mut signaling = signaling.lock().await;
                    self.call.start_call(&mut signaling, &callee).await
                };
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, callee, "failed to start call");
                    self.end_call_audio().await;
                }
            }
            EngineCommand::EndCall => self.hang_up().await,
            EngineCommand::PlayMusic { query } => {
                let actions = self.arbiter.acquire(AudioOwner::Music);
                self.apply(actions).await;
                if let Err(e) = self.music.play(&query).await {
                    tracing::warn!(error = %e, query, "music playback failed");
                    let actions = self.arbiter.release(AudioOwner::Music);
                    self.apply(actions).await;
                }
            }
            EngineCommand::StopMusic => {
                self.music.stop().await;
                let actions = self.arbiter.release(AudioOwner::Music);
                self.apply(actions).await;
            }
            EngineCommand::TogglePauseMusic => {
                self.music.toggle_pause();
            }
            EngineCommand::AssistantSpeaking => {
                let actions = self.arbiter.acquire(AudioOwner::Conversation);
                self.apply(actions).await;
            }
            EngineCommand::SendText { text } => {
                if let Err(e) = self.session.send_text_message(&text).await {
                    tracing::warn!(error = %e, "failed to inject text message");
                }
            }
            EngineCommand::Shutdown => unreachable!("handled by the main loop"),
        }
    }

    async fn on_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PressStarted => {
                let now = Instant::now();
                if self.session.voice_message_active(now) {
                    tracing::info!("recording voice message");
                    self.recording = true;
                    self.recorded.clear();
                    self.recorded_chunks = 0;
                } else {
                    // barge-in: drop whatever the assistant was saying
                    self.playback.clear();
                    if let Err(e) = self.session.activity_start().await {
                        tracing::debug!(error = %e, "activity start dropped");
                    }
                }
            }
            InputEvent::AudioChunk(samples) => {
                if self.recording {
                    let cap = self.config.audio.send_rate as usize * MAX_VOICE_MESSAGE_SECS;
                    if self.recorded.len() < cap {
                        self.recorded.extend_from_slice(&samples);
                        self.recorded_chunks += 1;
                    }
                } else if !self.session.is_suspended() {
                    if let Err(e) = self.session.send_audio_chunk(&samples).await {
                        tracing::debug!(error = %e, "audio chunk dropped");
                    }
                }
            }
            InputEvent::PressEnded => {
                if self.recording {
                    self.recording = false;
                    self.finish_voice_message().await;
                } else if let Err(e) = self.session.activity_end().await {
                    tracing::debug!(error = %e, "activity end dropped");
                }
            }
        }
    }

    async fn finish_voice_message(&mut self) {
        self.session.clear_voice_message();
        let samples = std::mem::take(&mut self.recorded);

        if self.recorded_chunks < MIN_VOICE_MESSAGE_CHUNKS {
            tracing::info!(
                chunks = self.recorded_chunks,
                "voice message too short, discarding"
            );
            return;
        }

        let Some(sink) = self.voice_sink.clone() else {
            tracing::warn!("no voice message sink configured, discarding recording");
            return;
        };

        match samples_to_wav(&samples, self.config.audio.send_rate) {
            Ok(wav) => {
                tokio::spawn(async move {
                    if let Err(e) = sink.deliver(wav).await {
                        tracing::warn!(error = %e, "voice message delivery failed");
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "voice message encoding failed"),
        }

        // the recording interrupted the conversation; start fresh
        self.reset_session().await;
    }

    async fn on_signal(&mut self, event: SignalEvent) {
        if let SignalEvent::IncomingCall { session_id, caller } = &event {
            if self.call.is_active() {
                tracing::info!(session_id, caller, "busy, rejecting incoming call");
                let signaling = Arc::clone(&self.signaling);
                let mut signaling = signaling.lock().await;
                if let Err(e) = self.call.reject_call(&mut signaling, session_id).await {
                    tracing::warn!(error = %e, "failed to reject call");
                }
                return;
            }

            tracing::info!(session_id, caller, "incoming call, answering");
            // taking the speaker for the call closes conversation playback
            // and wipes its queue; the chime must finish before that
            self.playback
                .enqueue(&chime::notification_chime(self.config.audio.playback_rate));
            self.playback.drain(CHIME_DRAIN_TIMEOUT).await;
            self.begin_call_audio().await;
            let signaling = Arc::clone(&self.signaling);
            let outcome = {
                let mut signaling = signaling.lock().await;
                self.call.accept_call(&mut signaling, session_id).await
            };
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "failed to accept call");
                self.end_call_audio().await;
            }
            return;
        }

        let was_active = self.call.is_active();
        let signaling = Arc::clone(&self.signaling);
        let outcome = {
            let mut signaling = signaling.lock().await;
            self.call.handle_event(&event, &mut signaling).await
        };
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "signaling event handling failed");
        }
        if was_active && !self.call.is_active() {
            self.end_call_audio().await;
        }
    }

    /// Hand the speaker to the call and pause the conversation
    async fn begin_call_audio(&mut self) {
        let actions = self.arbiter.acquire(AudioOwner::Call);
        self.apply(actions).await;
        self.session.set_suspended(true);
        self.in_call.store(true, Ordering::Relaxed);
    }

    /// Return the speaker after a call and resume the conversation
    async fn end_call_audio(&mut self) {
        let actions = self.arbiter.release(AudioOwner::Call);
        self.apply(actions).await;
        self.session.set_suspended(false);
        self.in_call.store(false, Ordering::Relaxed);
    }

    async fn hang_up(&mut self) {
        let signaling = Arc::clone(&self.signaling);
        let outcome = {
            let mut signaling = signaling.lock().await;
            self.call.end_call(&mut signaling).await
        };
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "hangup signaling failed");
        }
        self.end_call_audio().await;
    }

    async fn apply(&mut self, actions: Vec<ArbiterAction>) {
        for action in actions {
            match action {
                ArbiterAction::StopMusicProcess => self.music.stop().await,
                ArbiterAction::SuspendMusicProcess => self.music.pause(),
                ArbiterAction::ResumeMusicProcess => self.music.resume(),
                ArbiterAction::OpenPlayback => self.playback.open(),
                ArbiterAction::ClosePlayback => {
                    self.playback.clear();
                    self.playback.close();
                }
            }
        }
    }
}

/// Input thread: poll the button, stream capture chunks while held
fn spawn_input_thread(
    config: &Config,
    tx: mpsc::UnboundedSender<InputEvent>,
    shutdown: Arc<AtomicBool>,
) {
    let button_config = config.button.clone();
    let capture_rate = config.audio.capture_rate;
    let send_rate = config.audio.send_rate;
    let chunk_size = config.audio.chunk_size;

    let spawned = std::thread::Builder::new()
        .name("input".to_string())
        .spawn(move || {
            let mut button: Box<dyn TalkButton> = button::from_config(&button_config);
            let mut capture = AudioCapture::new(capture_rate, chunk_size);
            let resampler = Resampler::new(capture_rate, send_rate);
            let mut chunk_rx: Option<tokio::sync::mpsc::Receiver<Vec<i16>>> = None;
            let mut pressed = false;

            loop {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }

                let level = button.is_pressed();
                if level && !pressed {
                    pressed = true;
                    match capture.start() {
                        Ok(rx) => chunk_rx = Some(rx),
                        Err(e) => tracing::warn!(error = %e, "cannot start capture"),
                    }
                    if tx.send(InputEvent::PressStarted).is_err() {
                        return;
                    }
                } else if !level && pressed {
                    pressed = false;
                    // flush whatever the stream produced before stopping
                    if let Some(rx) = &mut chunk_rx {
                        while let Ok(chunk) = rx.try_recv() {
                            let _ = tx.send(InputEvent::AudioChunk(resampler.process(&chunk)));
                        }
                    }
                    capture.stop();
                    chunk_rx = None;
                    if tx.send(InputEvent::PressEnded).is_err() {
                        return;
                    }
                }

                if pressed {
                    if let Some(rx) = &mut chunk_rx {
                        while let Ok(chunk) = rx.try_recv() {
                            if tx
                                .send(InputEvent::AudioChunk(resampler.process(&chunk)))
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }

                std::thread::sleep(INPUT_POLL_PERIOD);
            }
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn input thread");
    }
}

/// Poll signaling on its own task, forwarding events to the engine loop
fn spawn_signal_poller(
    signaling: Arc<tokio::sync::Mutex<CallSignaling>>,
    interval: Duration,
    tx: mpsc::UnboundedSender<SignalEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            let events = {
                let mut signaling = signaling.lock().await;
                signaling.poll_once().await
            };
            match events {
                Ok(events) => {
                    for event in events {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    // transient store failures are skipped; next tick retries
                    tracing::debug!(error = %e, "signaling poll failed");
                }
            }
        }
    })
}
