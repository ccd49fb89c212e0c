//! External music player process control
//!
//! Playback is delegated to an external player (mpv by default) spawned in
//! its own process group so that pause/resume/stop can address the player
//! and anything it forks with a single group signal. Pause is SIGSTOP,
//! resume SIGCONT, and stop escalates SIGTERM to SIGKILL after a two
//! second grace period.

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::{Error, Result};

/// How long to wait after SIGTERM before escalating to SIGKILL
const STOP_GRACE: Duration = Duration::from_secs(2);

/// How long to wait after spawn before checking for an early exit
const SPAWN_CHECK_DELAY: Duration = Duration::from_millis(500);

/// Controls a single external music player process
#[derive(Debug)]
pub struct MusicPlayer {
    player: String,
    child: Option<Child>,
    paused: bool,
}

impl MusicPlayer {
    /// Create a player controller for the given binary
    #[must_use]
    pub const fn new(player: String) -> Self {
        Self {
            player,
            child: None,
            paused: false,
        }
    }

    /// Start playing the first search result for `query`.
    ///
    /// Any existing player process is stopped first.
    ///
    /// # Errors
    ///
    /// Returns an error if the player cannot be spawned or exits within the
    /// startup window (bad query, missing binary, no audio device).
    pub async fn play(&mut self, query: &str) -> Result<()> {
        self.stop().await;

        let mut command = Command::new(&self.player);
        command
            .arg("--no-video")
            .arg("--ytdl-format=bestaudio")
            .arg("--really-quiet")
            .arg(format!("ytdl://ytsearch1:{query}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::Music(format!("failed to spawn {}: {e}", self.player)))?;

        // give the player a moment to fail fast on a bad query
        tokio::time::sleep(SPAWN_CHECK_DELAY).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::Music(format!(
                "player exited immediately with {status}"
            )));
        }

        tracing::info!(query, pid = child.id(), "music playback started");
        self.child = Some(child);
        self.paused = false;
        Ok(())
    }

    /// Stop the player process if one is running.
    ///
    /// A suspended player is resumed first so it can handle SIGTERM.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();

        if self.paused {
            signal_group(pid, libc::SIGCONT);
            self.paused = false;
        }
        signal_group(pid, libc::SIGTERM);

        let deadline = std::time::Instant::now() + STOP_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(pid, %status, "music player stopped");
                    return;
                }
                Ok(None) if std::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(None) => {
                    tracing::warn!(pid, "music player ignored SIGTERM, killing");
                    signal_group(pid, libc::SIGKILL);
                    let _ = child.wait();
                    return;
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to reap music player");
                    return;
                }
            }
        }
    }

    /// Suspend the player process
    pub fn pause(&mut self) {
        if let Some(child) = &self.child {
            if !self.paused {
                signal_group(child.id(), libc::SIGSTOP);
                self.paused = true;
                tracing::debug!(pid = child.id(), "music paused");
            }
        }
    }

    /// Resume a suspended player process
    pub fn resume(&mut self) {
        if let Some(child) = &self.child {
            if self.paused {
                signal_group(child.id(), libc::SIGCONT);
                self.paused = false;
                tracing::debug!(pid = child.id(), "music resumed");
            }
        }
    }

    /// Toggle pause state; returns `true` if the player is now paused
    pub fn toggle_pause(&mut self) -> bool {
        if self.paused {
            self.resume();
        } else {
            self.pause();
        }
        self.paused
    }

    /// Whether a player process is alive (reaps an exited child)
    pub fn is_playing(&mut self) -> bool {
        match &mut self.child {
            Some(child) => match child.try_wait() {
                Ok(Some(_)) => {
                    self.child = None;
                    self.paused = false;
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Whether the player is currently suspended
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }
}

/// Send a signal to the player's process group
#[allow(unsafe_code, clippy::cast_possible_wrap)]
fn signal_group(pid: u32, signal: i32) {
    // the child was spawned with process_group(0), so its pid is the pgid
    let rc = unsafe { libc::killpg(pid as i32, signal) };
    if rc != 0 {
        tracing::debug!(pid, signal, "killpg failed (process already gone?)");
    }
}
