//! Configuration management for the pendant gateway
//!
//! Layering is env > `~/.config/pendant/config.toml` > defaults. The TOML
//! file is a partial overlay; every field is optional.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{Error, Result};

/// Pendant gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Device identifier used in call session ids and store paths
    pub device_id: String,

    /// Default peer to dial when a call is started without a target
    pub default_peer: Option<String>,

    /// Realtime session configuration
    pub session: SessionConfig,

    /// Call signaling configuration
    pub signaling: SignalingConfig,

    /// Audio pipeline configuration
    pub audio: AudioConfig,

    /// Push-to-talk button configuration
    pub button: ButtonConfig,

    /// Music player configuration
    pub music: MusicConfig,
}

/// Realtime session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the realtime backend
    pub url: String,

    /// API key sent in the `Authorization` header
    pub api_key: String,

    /// Model identifier requested on connect
    pub model: String,

    /// Voice name for synthesized output
    pub voice: String,

    /// System instructions sent in the session handshake
    pub instructions: String,

    /// Base for exponential reconnect backoff, in seconds
    pub reconnect_base_secs: f64,

    /// Maximum reconnect attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Idle window after the last response before the session is reset
    pub reset_timeout_secs: u64,

    /// Window during which voice-message mode stays armed
    pub voice_message_timeout_secs: u64,
}

/// Call signaling configuration
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Base URL of the shared key/value signaling store
    pub base_url: String,

    /// Poll period in milliseconds
    pub poll_interval_ms: u64,

    /// How long an outgoing call rings before it is abandoned
    pub ring_timeout_secs: u64,
}

/// Audio pipeline configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone capture rate in Hz
    pub capture_rate: u32,

    /// Rate the backend expects for uploaded audio
    pub send_rate: u32,

    /// Rate of audio received from the backend
    pub receive_rate: u32,

    /// Output device rate in Hz
    pub playback_rate: u32,

    /// Samples per capture chunk
    pub chunk_size: usize,
}

/// Push-to-talk button configuration
#[derive(Debug, Clone)]
pub struct ButtonConfig {
    /// GPIO value file for the button line (sysfs), if present
    pub gpio_value_path: Option<PathBuf>,

    /// Treat a low line level as pressed
    pub active_low: bool,
}

/// Music player configuration
#[derive(Debug, Clone)]
pub struct MusicConfig {
    /// Player binary (spawned in its own process group)
    pub player: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "pendant".to_string(),
            default_peer: None,
            session: SessionConfig {
                url: "wss://api.openai.com/v1/realtime".to_string(),
                api_key: String::new(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: "alloy".to_string(),
                instructions: String::new(),
                reconnect_base_secs: 2.0,
                max_reconnect_attempts: 5,
                reset_timeout_secs: 30,
                voice_message_timeout_secs: 60,
            },
            signaling: SignalingConfig {
                base_url: String::new(),
                poll_interval_ms: 300,
                ring_timeout_secs: 60,
            },
            audio: AudioConfig {
                capture_rate: 48_000,
                send_rate: 16_000,
                receive_rate: 24_000,
                playback_rate: 48_000,
                chunk_size: 1024,
            },
            button: ButtonConfig {
                gpio_value_path: None,
                active_low: true,
            },
            music: MusicConfig {
                player: "mpv".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file, then environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if no API key is configured anywhere.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file_path() {
            if path.exists() {
                let raw = std::fs::read_to_string(&path)?;
                let file: ConfigFile = toml::from_str(&raw)?;
                config.apply_file(file);
                tracing::debug!(path = %path.display(), "loaded config file");
            }
        }

        config.apply_env();

        if config.session.api_key.is_empty() {
            return Err(Error::Config(
                "no API key configured (set PENDANT_API_KEY or session.api_key)".to_string(),
            ));
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.device_id {
            self.device_id = v;
        }
        if let Some(v) = file.default_peer {
            self.default_peer = Some(v);
        }

        let s = file.session;
        if let Some(v) = s.url {
            self.session.url = v;
        }
        if let Some(v) = s.api_key {
            self.session.api_key = v;
        }
        if let Some(v) = s.model {
            self.session.model = v;
        }
        if let Some(v) = s.voice {
            self.session.voice = v;
        }
        if let Some(v) = s.instructions {
            self.session.instructions = v;
        }
        if let Some(v) = s.reconnect_base_secs {
            self.session.reconnect_base_secs = v;
        }
        if let Some(v) = s.max_reconnect_attempts {
            self.session.max_reconnect_attempts = v;
        }
        if let Some(v) = s.reset_timeout_secs {
            self.session.reset_timeout_secs = v;
        }
        if let Some(v) = s.voice_message_timeout_secs {
            self.session.voice_message_timeout_secs = v;
        }

        let sig = file.signaling;
        if let Some(v) = sig.base_url {
            self.signaling.base_url = v;
        }
        if let Some(v) = sig.poll_interval_ms {
            self.signaling.poll_interval_ms = v;
        }
        if let Some(v) = sig.ring_timeout_secs {
            self.signaling.ring_timeout_secs = v;
        }

        let a = file.audio;
        if let Some(v) = a.capture_rate {
            self.audio.capture_rate = v;
        }
        if let Some(v) = a.send_rate {
            self.audio.send_rate = v;
        }
        if let Some(v) = a.receive_rate {
            self.audio.receive_rate = v;
        }
        if let Some(v) = a.playback_rate {
            self.audio.playback_rate = v;
        }
        if let Some(v) = a.chunk_size {
            self.audio.chunk_size = v;
        }

        let b = file.button;
        if let Some(v) = b.gpio_value_path {
            self.button.gpio_value_path = Some(PathBuf::from(v));
        }
        if let Some(v) = b.active_low {
            self.button.active_low = v;
        }

        if let Some(v) = file.music.player {
            self.music.player = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("PENDANT_API_KEY") {
            if !v.is_empty() {
                self.session.api_key = v;
            }
        }
        if let Ok(v) = std::env::var("PENDANT_REALTIME_URL") {
            if !v.is_empty() {
                self.session.url = v;
            }
        }
        if let Ok(v) = std::env::var("PENDANT_SIGNALING_URL") {
            if !v.is_empty() {
                self.signaling.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("PENDANT_DEVICE_ID") {
            if !v.is_empty() {
                self.device_id = v;
            }
        }
    }
}

/// Locate `config.toml` under the platform config directory
fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "pendant")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    device_id: Option<String>,

    #[serde(default)]
    default_peer: Option<String>,

    #[serde(default)]
    session: SessionFileConfig,

    #[serde(default)]
    signaling: SignalingFileConfig,

    #[serde(default)]
    audio: AudioFileConfig,

    #[serde(default)]
    button: ButtonFileConfig,

    #[serde(default)]
    music: MusicFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct SessionFileConfig {
    url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    voice: Option<String>,
    instructions: Option<String>,
    reconnect_base_secs: Option<f64>,
    max_reconnect_attempts: Option<u32>,
    reset_timeout_secs: Option<u64>,
    voice_message_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SignalingFileConfig {
    base_url: Option<String>,
    poll_interval_ms: Option<u64>,
    ring_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AudioFileConfig {
    capture_rate: Option<u32>,
    send_rate: Option<u32>,
    receive_rate: Option<u32>,
    playback_rate: Option<u32>,
    chunk_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ButtonFileConfig {
    gpio_value_path: Option<String>,
    active_low: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct MusicFileConfig {
    player: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.audio.capture_rate, 48_000);
        assert_eq!(config.audio.send_rate, 16_000);
        assert_eq!(config.audio.receive_rate, 24_000);
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.signaling.poll_interval_ms, 300);
    }

    #[test]
    fn file_overlay_is_partial() {
        let file: ConfigFile = toml::from_str(
            r#"
            device_id = "kitchen"

            [session]
            reset_timeout_secs = 45

            [signaling]
            base_url = "https://calls.example.test"
            "#,
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(file);

        assert_eq!(config.device_id, "kitchen");
        assert_eq!(config.session.reset_timeout_secs, 45);
        assert_eq!(config.signaling.base_url, "https://calls.example.test");
        // untouched fields keep defaults
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.audio.chunk_size, 1024);
    }
}
