//! Peer call lifecycle
//!
//! [`PeerCallManager`] drives one call at a time over a [`PeerConnection`]
//! primitive, fed by signaling events from the poller. Remote candidates
//! that arrive before the remote description are queued and flushed exactly
//! once, in arrival order, after the description applies; later candidates
//! go straight to the connection. Teardown is idempotent.

pub mod candidate;
pub mod peer;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use self::candidate::IceCandidate;
use self::peer::{PeerConnection, PeerConnectionFactory, candidates_from_sdp};
use crate::signaling::{CallRole, CallSignaling, SignalEvent};
use crate::{Error, Result};

/// Where the active call is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Outgoing offer published, ringing
    OfferSent { since: Instant },
    /// Incoming call accepted, waiting for the caller's offer
    Answering,
    /// Descriptions exchanged, media flowing
    Connected,
}

/// Manages the active peer call
pub struct PeerCallManager {
    factory: Box<dyn PeerConnectionFactory>,
    peer: Option<Box<dyn PeerConnection>>,
    state: CallState,
    session_id: Option<String>,
    role: Option<CallRole>,
    remote_ready: bool,
    pending: VecDeque<IceCandidate>,
    flushed: bool,
}

impl PeerCallManager {
    /// Create a manager; connections are built per call from `factory`
    #[must_use]
    pub fn new(factory: Box<dyn PeerConnectionFactory>) -> Self {
        Self {
            factory,
            peer: None,
            state: CallState::Idle,
            session_id: None,
            role: None,
            remote_ready: false,
            pending: VecDeque::new(),
            flushed: false,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    /// Whether a call is in progress
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.state, CallState::Idle)
    }

    /// Session id of the active call
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Remote candidates queued behind the remote description
    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Place an outgoing call: announce it, publish the offer and local
    /// candidates, then ring until answered or timed out.
    ///
    /// # Errors
    ///
    /// Returns an error if a call is already active, no media stack exists,
    /// or signaling fails.
    pub async fn start_call(
        &mut self,
        signaling: &mut CallSignaling,
        callee: &str,
    ) -> Result<()> {
        if self.is_active() {
            return Err(Error::Call("a call is already in progress".to_string()));
        }

        let peer = self.factory.create()?;
        let session_id = signaling.create_call(callee).await?;
        let offer = peer.create_offer().await?;
        signaling.send_offer(&session_id, &offer).await?;

        let local_sdp = peer.local_description().await.unwrap_or(offer);
        for candidate in candidates_from_sdp(&local_sdp) {
            signaling
                .send_candidate(&session_id, CallRole::Caller, &candidate.to_string())
                .await?;
        }

        self.peer = Some(peer);
        self.session_id = Some(session_id);
        self.role = Some(CallRole::Caller);
        self.state = CallState::OfferSent {
            since: Instant::now(),
        };
        Ok(())
    }

    /// Accept an incoming call; the caller's offer arrives on a later poll.
    ///
    /// # Errors
    ///
    /// Returns an error if a call is already active, no media stack exists,
    /// or signaling fails.
    pub async fn accept_call(
        &mut self,
        signaling: &mut CallSignaling,
        session_id: &str,
    ) -> Result<()> {
        if self.is_active() {
            return Err(Error::Call("a call is already in progress".to_string()));
        }

        let peer = self.factory.create()?;
        signaling.accept_call(session_id).await?;

        self.peer = Some(peer);
        self.session_id = Some(session_id.to_string());
        self.role = Some(CallRole::Callee);
        self.state = CallState::Answering;
        Ok(())
    }

    /// Decline an incoming call without touching the active-call state.
    ///
    /// # Errors
    ///
    /// Returns an error if signaling fails.
    pub async fn reject_call(
        &self,
        signaling: &mut CallSignaling,
        session_id: &str,
    ) -> Result<()> {
        signaling.reject_call(session_id).await
    }

    /// Apply one signaling event to the active call.
    ///
    /// Events for other sessions and malformed candidates are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the media stack or signaling fails.
    pub async fn handle_event(
        &mut self,
        event: &SignalEvent,
        signaling: &mut CallSignaling,
    ) -> Result<()> {
        match event {
            SignalEvent::AnswerReceived { session_id, sdp } => {
                if !self.is_current(session_id) || self.role != Some(CallRole::Caller) {
                    return Ok(());
                }
                let peer = self.peer_ref()?;
                peer.handle_answer(sdp).await?;
                self.remote_ready = true;
                self.flush_pending().await;
                self.state = CallState::Connected;
                tracing::info!(session_id, "call connected");
            }
            SignalEvent::OfferReceived { session_id, sdp } => {
                if !self.is_current(session_id) || self.role != Some(CallRole::Callee) {
                    return Ok(());
                }
                let answer = self.peer_ref()?.handle_offer(sdp).await?;
                self.remote_ready = true;
                signaling.send_answer(session_id, &answer).await?;

                let local_sdp = self
                    .peer_ref()?
                    .local_description()
                    .await
                    .unwrap_or(answer);
                for candidate in candidates_from_sdp(&local_sdp) {
                    signaling
                        .send_candidate(session_id, CallRole::Callee, &candidate.to_string())
                        .await?;
                }

                self.flush_pending().await;
                self.state = CallState::Connected;
                tracing::info!(session_id, "call connected");
            }
            SignalEvent::CandidateReceived {
                session_id,
                candidate,
            } => {
                if !self.is_current(session_id) {
                    return Ok(());
                }
                let parsed = match IceCandidate::parse(candidate) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed remote candidate");
                        return Ok(());
                    }
                };
                if self.remote_ready && self.flushed {
                    self.peer_ref()?.add_ice_candidate(&parsed).await?;
                } else {
                    self.pending.push_back(parsed);
                }
            }
            SignalEvent::CallEnded { session_id, status } => {
                if self.is_current(session_id) {
                    tracing::info!(session_id, status = status.as_str(), "remote ended call");
                    self.teardown(signaling, false).await?;
                }
            }
            // accepting or rejecting an incoming call is the engine's choice
            SignalEvent::IncomingCall { .. } => {}
        }
        Ok(())
    }

    /// Whether an outgoing call has rung longer than `timeout`
    #[must_use]
    pub fn ring_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            CallState::OfferSent { since } => now.saturating_duration_since(since) >= timeout,
            _ => false,
        }
    }

    /// End the active call. Safe to call when idle.
    ///
    /// # Errors
    ///
    /// Returns an error if signaling fails; local state is reset regardless.
    pub async fn end_call(&mut self, signaling: &mut CallSignaling) -> Result<()> {
        if !self.is_active() && self.peer.is_none() {
            return Ok(());
        }
        self.teardown(signaling, true).await
    }

    /// Flush queued remote candidates, once, in arrival order
    async fn flush_pending(&mut self) {
        if self.flushed {
            return;
        }
        self.flushed = true;

        let Some(peer) = self.peer.as_ref() else {
            return;
        };
        while let Some(candidate) = self.pending.pop_front() {
            if let Err(e) = peer.add_ice_candidate(&candidate).await {
                tracing::warn!(error = %e, "failed to apply queued candidate");
            }
        }
    }

    async fn teardown(&mut self, signaling: &mut CallSignaling, announce: bool) -> Result<()> {
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.state = CallState::Idle;
        self.session_id = None;
        self.role = None;
        self.remote_ready = false;
        self.flushed = false;
        self.pending.clear();

        if announce {
            signaling.end_call().await?;
        }
        Ok(())
    }

    fn is_current(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    fn peer_ref(&self) -> Result<&dyn PeerConnection> {
        self.peer
            .as_deref()
            .ok_or_else(|| Error::Call("no active peer connection".to_string()))
    }
}
