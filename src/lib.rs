//! Pendant gateway
//!
//! Runtime for a wearable voice assistant: it holds a realtime
//! conversation session over WebSocket, exchanges call signaling through a
//! polled key/value store, drives peer calls, and arbitrates the device's
//! single audio output between the conversation, calls, and music.
//!
//! The entry point is [`Engine`], which owns the main loop. The layers
//! underneath are usable on their own: [`session::SessionClient`] for the
//! realtime connection, [`signaling::CallSignaling`] for offer/answer/ICE
//! exchange, [`call::PeerCallManager`] for call lifecycle, and the
//! [`audio`] pipeline for capture, playback, resampling, and ownership
//! arbitration.

pub mod audio;
pub mod button;
pub mod call;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod signaling;

pub use config::Config;
pub use engine::{Engine, EngineCommand, EngineHandle, VoiceMessageSink};
pub use error::{Error, Result};
