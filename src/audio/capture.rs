//! Audio capture from the microphone
//!
//! Captures mono audio at the device rate and hands it off in fixed-size
//! i16 chunks over a bounded channel. The cpal callback never blocks: when
//! the consumer falls behind, chunks are dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Capacity of the capture chunk channel
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Captures audio from the default input device
pub struct AudioCapture {
    sample_rate: u32,
    chunk_size: usize,
    stream: Option<Stream>,
    dropped: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Create a capture instance for the given rate and chunk size
    #[must_use]
    pub fn new(sample_rate: u32, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
            stream: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open the input device and start streaming chunks.
    ///
    /// Returns the receiving end of the chunk channel. A previous stream is
    /// dropped first.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable input device or configuration exists.
    pub fn start(&mut self) -> Result<mpsc::Receiver<Vec<i16>>> {
        self.stop();

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(self.sample_rate)
                    && c.max_sample_rate() >= SampleRate(self.sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable input config found".to_string()))?;

        let config = supported
            .with_sample_rate(SampleRate(self.sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.sample_rate,
            chunk_size = self.chunk_size,
            "audio capture initialized"
        );

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let stream = build_stream(&device, &config, self.chunk_size, tx, &self.dropped)?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        Ok(rx)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Whether a capture stream is active
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Chunks dropped because the consumer fell behind
    #[must_use]
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    chunk_size: usize,
    tx: mpsc::Sender<Vec<i16>>,
    dropped: &Arc<AtomicU64>,
) -> Result<Stream> {
    let dropped = Arc::clone(dropped);
    let mut pending: Vec<i16> = Vec::with_capacity(chunk_size * 2);

    device
        .build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                pending.extend_from_slice(data);
                while pending.len() >= chunk_size {
                    let chunk: Vec<i16> = pending.drain(..chunk_size).collect();
                    if tx.try_send(chunk).is_err() {
                        dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Encode i16 samples as a mono 16-bit WAV file
///
/// # Errors
///
/// Returns an error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
