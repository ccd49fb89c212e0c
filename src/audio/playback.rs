//! Streaming audio playback to the speaker
//!
//! Playback runs on a dedicated thread because cpal streams are not Send.
//! The thread owns the output stream and drains a shared sample queue from
//! the stream callback, emitting silence when the queue is empty. Producers
//! append decoded audio to the queue from any task; the engine opens and
//! closes the stream through a small control channel as output-device
//! ownership changes.

use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Shared playback sample queue
type SampleQueue = Arc<Mutex<VecDeque<i16>>>;

enum PlaybackCtl {
    Open,
    Close,
    Shutdown,
}

/// Handle to the playback thread
///
/// Cloneable; all clones feed the same queue and control the same stream.
#[derive(Clone)]
pub struct PlaybackHandle {
    queue: SampleQueue,
    ctl: std_mpsc::Sender<PlaybackCtl>,
}

impl PlaybackHandle {
    /// Spawn the playback thread for the given output rate.
    ///
    /// The stream is not opened until [`open`](Self::open) is called. Device
    /// failures at open time are logged, not fatal; the gateway keeps
    /// running without audio output.
    #[must_use]
    pub fn spawn(sample_rate: u32) -> Self {
        let queue: SampleQueue = Arc::new(Mutex::new(VecDeque::new()));
        let (ctl_tx, ctl_rx) = std_mpsc::channel();

        let thread_queue = Arc::clone(&queue);
        std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread(sample_rate, &thread_queue, &ctl_rx))
            .map_or_else(
                |e| tracing::error!(error = %e, "failed to spawn playback thread"),
                |_| (),
            );

        Self {
            queue,
            ctl: ctl_tx,
        }
    }

    /// Open the output stream
    pub fn open(&self) {
        let _ = self.ctl.send(PlaybackCtl::Open);
    }

    /// Close the output stream, releasing the device
    pub fn close(&self) {
        let _ = self.ctl.send(PlaybackCtl::Close);
    }

    /// Stop the playback thread entirely
    pub fn shutdown(&self) {
        let _ = self.ctl.send(PlaybackCtl::Shutdown);
    }

    /// Append samples to the playback queue
    pub fn enqueue(&self, samples: &[i16]) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(samples.iter().copied());
        }
    }

    /// Drop all queued samples (barge-in, call start)
    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    /// Samples waiting to be played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Wait until the queue has been played out or `timeout` elapses.
    ///
    /// Returns whether the queue emptied. With no open stream nothing
    /// consumes the queue, so callers get the timeout path there.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

fn playback_thread(
    sample_rate: u32,
    queue: &SampleQueue,
    ctl: &std_mpsc::Receiver<PlaybackCtl>,
) {
    let mut stream: Option<Stream> = None;

    loop {
        match ctl.recv() {
            Ok(PlaybackCtl::Open) => {
                if stream.is_none() {
                    match open_stream(sample_rate, queue) {
                        Ok(s) => {
                            tracing::debug!(sample_rate, "playback stream opened");
                            stream = Some(s);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to open playback stream");
                        }
                    }
                }
            }
            Ok(PlaybackCtl::Close) => {
                if stream.take().is_some() {
                    tracing::debug!("playback stream closed");
                }
            }
            Ok(PlaybackCtl::Shutdown) | Err(_) => break,
        }
    }
}

fn open_stream(sample_rate: u32, queue: &SampleQueue) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // fallback: duplicate mono onto a stereo device
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = usize::from(config.channels);

    let queue = Arc::clone(queue);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut queue = match queue.lock() {
                    Ok(q) => q,
                    Err(_) => return,
                };
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_operations_without_device() {
        // handle works even when no audio hardware exists
        let handle = PlaybackHandle::spawn(48_000);
        assert_eq!(handle.pending(), 0);

        handle.enqueue(&[1, 2, 3]);
        assert_eq!(handle.pending(), 3);

        handle.clear();
        assert_eq!(handle.pending(), 0);

        handle.shutdown();
    }

    #[test]
    fn clones_share_the_queue() {
        let handle = PlaybackHandle::spawn(48_000);
        let other = handle.clone();

        handle.enqueue(&[0; 10]);
        assert_eq!(other.pending(), 10);

        other.shutdown();
    }

    #[tokio::test]
    async fn drain_returns_once_the_queue_is_empty() {
        let handle = PlaybackHandle::spawn(48_000);
        assert!(handle.drain(Duration::from_millis(50)).await);
        handle.shutdown();
    }

    #[tokio::test]
    async fn drain_times_out_without_wiping_the_queue() {
        let handle = PlaybackHandle::spawn(48_000);
        handle.enqueue(&[1_000; 256]);

        // closed stream: nothing consumes the queue, so drain gives up
        // but the samples survive for whoever opens the device next
        assert!(!handle.drain(Duration::from_millis(100)).await);
        assert_eq!(handle.pending(), 256);

        handle.shutdown();
    }
}
