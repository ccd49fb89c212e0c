//! Realtime protocol event shapes
//!
//! Client events are built as JSON values and sent as text frames; server
//! events are parsed into a small enum covering what the gateway reacts to.
//! Unknown event types are preserved as [`ServerEvent::Other`] so the event
//! loop can log them at trace level without failing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::config::SessionConfig;
use crate::{Error, Result};

/// Server event types the gateway dispatches on
pub mod types {
    pub const SESSION_CREATED: &str = "session.created";
    pub const AUDIO_DELTA: &str = "response.audio.delta";
    pub const INPUT_TRANSCRIPT: &str =
        "conversation.item.input_audio_transcription.completed";
    pub const OUTPUT_TRANSCRIPT: &str = "response.audio_transcript.done";
    pub const OUTPUT_ITEM_DONE: &str = "response.output_item.done";
    pub const RESPONSE_DONE: &str = "response.done";
    pub const ERROR: &str = "error";
}

/// Parsed server-to-client event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Session established on the backend
    SessionCreated,
    /// Chunk of synthesized audio (decoded pcm16)
    AudioDelta { samples: Vec<i16> },
    /// Transcription of the user's audio
    InputTranscript { text: String },
    /// Transcript of the assistant's spoken reply
    OutputTranscript { text: String },
    /// Tool invocation requested by the model
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// A response turn finished
    ResponseDone,
    /// Backend-reported error
    Error { message: String },
    /// Any event type the gateway does not act on
    Other { kind: String },
}

/// Parse a text frame into a [`ServerEvent`].
///
/// # Errors
///
/// Returns an error for frames that are not JSON objects with a `type`
/// field, or whose audio payload is not valid base64.
pub fn parse_event(text: &str) -> Result<ServerEvent> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol("event missing type field".to_string()))?;

    match kind {
        types::SESSION_CREATED => Ok(ServerEvent::SessionCreated),
        types::AUDIO_DELTA => {
            let delta = value
                .get("delta")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Protocol("audio delta missing payload".to_string()))?;
            let bytes = BASE64
                .decode(delta)
                .map_err(|e| Error::Protocol(format!("bad audio payload: {e}")))?;
            Ok(ServerEvent::AudioDelta {
                samples: pcm16_from_bytes(&bytes),
            })
        }
        types::INPUT_TRANSCRIPT => Ok(ServerEvent::InputTranscript {
            text: value
                .get("transcript")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        types::OUTPUT_TRANSCRIPT => Ok(ServerEvent::OutputTranscript {
            text: value
                .get("transcript")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        types::OUTPUT_ITEM_DONE => parse_output_item(&value),
        types::RESPONSE_DONE => Ok(ServerEvent::ResponseDone),
        types::ERROR => {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Ok(ServerEvent::Error { message })
        }
        other => Ok(ServerEvent::Other {
            kind: other.to_string(),
        }),
    }
}

/// Output items are only interesting when they carry a function call
fn parse_output_item(value: &Value) -> Result<ServerEvent> {
    let item = value
        .get("item")
        .ok_or_else(|| Error::Protocol("output item event without item".to_string()))?;

    if item.get("type").and_then(Value::as_str) == Some("function_call") {
        let call_id = item
            .get("call_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("function call without call_id".to_string()))?;
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("function call without name".to_string()))?;
        let arguments = item
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or("{}");

        return Ok(ServerEvent::ToolCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        });
    }

    Ok(ServerEvent::Other {
        kind: types::OUTPUT_ITEM_DONE.to_string(),
    })
}

/// Session handshake sent right after connecting
#[must_use]
pub fn session_update(config: &SessionConfig, tools: &[Value]) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "modalities": ["text", "audio"],
            "instructions": config.instructions,
            "voice": config.voice,
            "input_audio_format": "pcm16",
            "output_audio_format": "pcm16",
            "input_audio_transcription": { "model": "whisper-1" },
            "turn_detection": null,
            "tools": tools,
        }
    })
}

/// Append captured audio to the input buffer
#[must_use]
pub fn audio_append(samples: &[i16]) -> Value {
    json!({
        "type": "input_audio_buffer.append",
        "audio": BASE64.encode(pcm16_to_bytes(samples)),
    })
}

/// Clear any partially uploaded input audio
#[must_use]
pub fn audio_clear() -> Value {
    json!({ "type": "input_audio_buffer.clear" })
}

/// Commit the input buffer, closing the user's turn
#[must_use]
pub fn audio_commit() -> Value {
    json!({ "type": "input_audio_buffer.commit" })
}

/// Ask the backend to produce a response
#[must_use]
pub fn response_create() -> Value {
    json!({ "type": "response.create" })
}

/// Deliver a tool result for a previous function call
#[must_use]
pub fn function_call_output(call_id: &str, output: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }
    })
}

/// Inject a user-role text message (reminders, notifications)
#[must_use]
pub fn user_text_message(text: &str) -> Value {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "user",
            "content": [{ "type": "input_text", "text": text }],
        }
    })
}

/// Decode little-endian pcm16 bytes into samples
fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian pcm16 bytes
fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_delta_decodes_pcm16() {
        let samples: Vec<i16> = vec![0, 1, -1, 256];
        let encoded = BASE64.encode(pcm16_to_bytes(&samples));
        let frame = json!({ "type": types::AUDIO_DELTA, "delta": encoded }).to_string();

        let event = parse_event(&frame).unwrap();
        assert_eq!(event, ServerEvent::AudioDelta { samples });
    }

    #[test]
    fn function_call_item_becomes_tool_call() {
        let frame = json!({
            "type": types::OUTPUT_ITEM_DONE,
            "item": {
                "type": "function_call",
                "call_id": "call_1",
                "name": "music_play",
                "arguments": "{\"query\":\"jazz\"}",
            }
        })
        .to_string();

        let event = parse_event(&frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::ToolCall {
                call_id: "call_1".to_string(),
                name: "music_play".to_string(),
                arguments: "{\"query\":\"jazz\"}".to_string(),
            }
        );
    }

    #[test]
    fn unknown_event_types_are_preserved() {
        let frame = json!({ "type": "rate_limits.updated" }).to_string();
        let event = parse_event(&frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::Other {
                kind: "rate_limits.updated".to_string()
            }
        );
    }

    #[test]
    fn missing_type_is_a_protocol_error() {
        assert!(parse_event("{\"delta\": \"zz\"}").is_err());
        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn handshake_disables_turn_detection() {
        let config = crate::config::Config::default().session;
        let update = session_update(&config, &[]);
        assert!(update.pointer("/session/turn_detection").unwrap().is_null());
        assert_eq!(
            update.pointer("/session/input_audio_format").unwrap(),
            "pcm16"
        );
    }

    #[test]
    fn audio_append_roundtrips() {
        let samples: Vec<i16> = vec![100, -100, 0, i16::MAX];
        let event = audio_append(&samples);
        let encoded = event.get("audio").and_then(Value::as_str).unwrap();
        let decoded = pcm16_from_bytes(&BASE64.decode(encoded).unwrap());
        assert_eq!(decoded, samples);
    }
}
