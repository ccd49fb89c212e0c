//! Engine-owned capabilities
//!
//! These tools act on engine state (calls, music, voice messages) and so
//! communicate with the engine loop over its command channel rather than
//! touching shared state directly. Commands are fire-and-forget: the engine
//! reports outcomes through the conversation.

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Capability, CapabilityResult};
use crate::Result;
use crate::engine::EngineCommand;

fn no_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Start a video call to a peer
pub struct StartCallCapability {
    engine: mpsc::UnboundedSender<EngineCommand>,
}

impl StartCallCapability {
    #[must_use]
    pub const fn new(engine: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Capability for StartCallCapability {
    fn name(&self) -> &str {
        "videocall_start"
    }

    fn description(&self) -> &str {
        "Start a video call to a contact. Uses the default contact when none is given."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "peer": { "type": "string", "description": "Contact device id to call" }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<CapabilityResult> {
        let peer = args
            .get("peer")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        if self
            .engine
            .send(EngineCommand::StartCall { peer })
            .is_err()
        {
            return Ok(CapabilityResult::fail("calling is not available right now"));
        }
        Ok(CapabilityResult::ok("calling now"))
    }
}

/// Hang up the active video call
pub struct EndCallCapability {
    engine: mpsc::UnboundedSender<EngineCommand>,
}

impl EndCallCapability {
    #[must_use]
    pub const fn new(engine: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Capability for EndCallCapability {
    fn name(&self) -> &str {
        "videocall_end"
    }

    fn description(&self) -> &str {
        "End the current video call."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: Value) -> Result<CapabilityResult> {
        let _ = self.engine.send(EngineCommand::EndCall);
        Ok(CapabilityResult::ok("call ended"))
    }
}

/// Play music through the external player
pub struct PlayMusicCapability {
    engine: mpsc::UnboundedSender<EngineCommand>,
}

impl PlayMusicCapability {
    #[must_use]
    pub const fn new(engine: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Capability for PlayMusicCapability {
    fn name(&self) -> &str {
        "music_play"
    }

    fn description(&self) -> &str {
        "Play music matching a search query through the speaker."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Song, artist, or genre to play" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<CapabilityResult> {
        let Some(query) = args.get("query").and_then(Value::as_str) else {
            return Ok(CapabilityResult::fail("tell me what to play"));
        };
        let _ = self.engine.send(EngineCommand::PlayMusic {
            query: query.to_string(),
        });
        Ok(CapabilityResult::ok(format!("playing {query}")))
    }
}

/// Stop music playback
pub struct StopMusicCapability {
    engine: mpsc::UnboundedSender<EngineCommand>,
}

impl StopMusicCapability {
    #[must_use]
    pub const fn new(engine: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Capability for StopMusicCapability {
    fn name(&self) -> &str {
        "music_stop"
    }

    fn description(&self) -> &str {
        "Stop the music that is currently playing."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: Value) -> Result<CapabilityResult> {
        let _ = self.engine.send(EngineCommand::StopMusic);
        Ok(CapabilityResult::ok("music stopped"))
    }
}

/// Pause or resume music playback
pub struct PauseMusicCapability {
    engine: mpsc::UnboundedSender<EngineCommand>,
}

impl PauseMusicCapability {
    #[must_use]
    pub const fn new(engine: mpsc::UnboundedSender<EngineCommand>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Capability for PauseMusicCapability {
    fn name(&self) -> &str {
        "music_pause"
    }

    fn description(&self) -> &str {
        "Pause the music, or resume it if already paused."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: Value) -> Result<CapabilityResult> {
        let _ = self.engine.send(EngineCommand::TogglePauseMusic);
        Ok(CapabilityResult::ok("ok"))
    }
}

/// Arm voice-message recording
///
/// Returns the `start_voice_recording` flag; the session client arms
/// voice-message mode when it sees it in the tool result.
pub struct VoiceMessageCapability;

#[async_trait]
impl Capability for VoiceMessageCapability {
    fn name(&self) -> &str {
        "voice_message_send"
    }

    fn description(&self) -> &str {
        "Prepare to record and send a voice message. The user then holds the button to record."
    }

    fn parameters(&self) -> Value {
        no_parameters()
    }

    async fn execute(&self, _args: Value) -> Result<CapabilityResult> {
        Ok(
            CapabilityResult::ok("ready to record, hold the button and speak")
                .with_data(json!({ "start_voice_recording": true })),
        )
    }
}
