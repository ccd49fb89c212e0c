//! Exclusive ownership of the audio output device
//!
//! The speaker is shared by three producers: conversation playback, call
//! audio, and the external music process. Only one may own it at a time.
//! The arbiter tracks the owner token and computes the release/acquire
//! actions for each transition; the engine executes them in order before
//! the new owner starts producing audio.
//!
//! Conversation is the resting owner: releasing a call or stopping music
//! hands the device back to conversation playback rather than leaving it
//! unowned. A call suspends music (it resumes afterwards); conversation
//! playback stops music outright.

/// Current holder of the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOwner {
    /// Assistant conversation playback
    Conversation,
    /// Peer call audio
    Call,
    /// External music player process
    Music,
}

/// Action the engine must perform to complete an ownership transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterAction {
    /// Terminate the music process
    StopMusicProcess,
    /// Suspend the music process (resumable)
    SuspendMusicProcess,
    /// Resume a suspended music process
    ResumeMusicProcess,
    /// Open the conversation playback stream
    OpenPlayback,
    /// Close the conversation playback stream
    ClosePlayback,
}

/// Tracks which producer owns the output device
#[derive(Debug)]
pub struct AudioArbiter {
    owner: Option<AudioOwner>,
    music_suspended: bool,
}

impl Default for AudioArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioArbiter {
    /// Create an arbiter with no owner yet
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: None,
            music_suspended: false,
        }
    }

    /// Current owner, if any
    #[must_use]
    pub const fn owner(&self) -> Option<AudioOwner> {
        self.owner
    }

    /// Whether the music process is suspended behind a call
    #[must_use]
    pub const fn music_suspended(&self) -> bool {
        self.music_suspended
    }

    /// Take ownership for `owner`, releasing the previous owner first.
    ///
    /// Returns the actions to execute, in order. Re-acquiring the current
    /// owner is a no-op.
    pub fn acquire(&mut self, owner: AudioOwner) -> Vec<ArbiterAction> {
        if self.owner == Some(owner) {
            return Vec::new();
        }

        let mut actions = Vec::new();

        match self.owner {
            Some(AudioOwner::Music) => {
                if owner == AudioOwner::Call {
                    actions.push(ArbiterAction::SuspendMusicProcess);
                    self.music_suspended = true;
                } else {
                    actions.push(ArbiterAction::StopMusicProcess);
                    self.music_suspended = false;
                }
            }
            Some(AudioOwner::Conversation) => {
                actions.push(ArbiterAction::ClosePlayback);
            }
            // call audio stops with peer teardown, nothing to do here
            Some(AudioOwner::Call) | None => {}
        }

        match owner {
            AudioOwner::Conversation => actions.push(ArbiterAction::OpenPlayback),
            AudioOwner::Call | AudioOwner::Music => {}
        }

        tracing::debug!(from = ?self.owner, to = ?owner, "audio ownership transfer");
        self.owner = Some(owner);
        actions
    }

    /// Release ownership held by `owner`.
    ///
    /// Idempotent: releasing when `owner` is not the current holder does
    /// nothing. The device falls back to a suspended music process if one
    /// exists, otherwise to conversation playback.
    pub fn release(&mut self, owner: AudioOwner) -> Vec<ArbiterAction> {
        if self.owner != Some(owner) {
            return Vec::new();
        }

        match owner {
            // conversation is the resting owner, nothing changes
            AudioOwner::Conversation => Vec::new(),
            AudioOwner::Call => {
                if self.music_suspended {
                    self.music_suspended = false;
                    self.owner = Some(AudioOwner::Music);
                    vec![ArbiterAction::ResumeMusicProcess]
                } else {
                    self.owner = Some(AudioOwner::Conversation);
                    vec![ArbiterAction::OpenPlayback]
                }
            }
            AudioOwner::Music => {
                self.music_suspended = false;
                self.owner = Some(AudioOwner::Conversation);
                vec![ArbiterAction::OpenPlayback]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_stops_music_outright() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Music);

        let actions = arbiter.acquire(AudioOwner::Conversation);
        assert_eq!(
            actions,
            vec![ArbiterAction::StopMusicProcess, ArbiterAction::OpenPlayback]
        );
        assert_eq!(arbiter.owner(), Some(AudioOwner::Conversation));
        assert!(!arbiter.music_suspended());
    }

    #[test]
    fn call_suspends_music_and_resumes_after() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Music);

        let actions = arbiter.acquire(AudioOwner::Call);
        assert_eq!(actions, vec![ArbiterAction::SuspendMusicProcess]);
        assert!(arbiter.music_suspended());

        let actions = arbiter.release(AudioOwner::Call);
        assert_eq!(actions, vec![ArbiterAction::ResumeMusicProcess]);
        assert_eq!(arbiter.owner(), Some(AudioOwner::Music));
    }

    #[test]
    fn call_without_music_falls_back_to_conversation() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Conversation);
        arbiter.acquire(AudioOwner::Call);

        let actions = arbiter.release(AudioOwner::Call);
        assert_eq!(actions, vec![ArbiterAction::OpenPlayback]);
        assert_eq!(arbiter.owner(), Some(AudioOwner::Conversation));
    }

    #[test]
    fn device_never_unowned_after_release() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Music);
        arbiter.release(AudioOwner::Music);
        assert!(arbiter.owner().is_some());

        arbiter.acquire(AudioOwner::Call);
        arbiter.release(AudioOwner::Call);
        assert!(arbiter.owner().is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Music);
        arbiter.acquire(AudioOwner::Call);

        assert!(!arbiter.release(AudioOwner::Call).is_empty());
        assert!(arbiter.release(AudioOwner::Call).is_empty());
        assert!(arbiter.release(AudioOwner::Music).is_empty());
        assert_eq!(arbiter.owner(), Some(AudioOwner::Music));
    }

    #[test]
    fn reacquire_is_noop() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Conversation);
        assert!(arbiter.acquire(AudioOwner::Conversation).is_empty());
    }

    #[test]
    fn call_takes_over_conversation_playback() {
        let mut arbiter = AudioArbiter::new();
        arbiter.acquire(AudioOwner::Conversation);

        let actions = arbiter.acquire(AudioOwner::Call);
        assert_eq!(actions, vec![ArbiterAction::ClosePlayback]);
    }
}
