//! Audio pipeline: capture, playback, rate conversion, output arbitration

pub mod arbiter;
pub mod capture;
pub mod chime;
pub mod music;
pub mod playback;
pub mod resampler;

pub use arbiter::{ArbiterAction, AudioArbiter, AudioOwner};
pub use capture::{AudioCapture, samples_to_wav};
pub use music::MusicPlayer;
pub use playback::PlaybackHandle;
pub use resampler::Resampler;
