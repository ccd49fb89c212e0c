//! Call signaling over a polled shared store
//!
//! Peers rendezvous through a shared JSON tree under `videocall/`: one
//! record per call session carrying the offer, answer, a status field, and
//! one append-only candidate list per side. There is no push channel; both
//! peers poll the tree and diff it against local seen-state, so every event
//! is announced exactly once per session. Seen-state is swept when the
//! calendar day changes to keep it from growing unboundedly.

pub mod store;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Value, json};

use self::store::SignalStore;
use crate::Result;

/// Store subtree holding call records
const CALLS_PATH: &str = "videocall";

/// Call record status values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Outgoing call announced, waiting for the callee
    Calling,
    /// Callee accepted and is preparing an answer
    Answering,
    /// Both descriptions exchanged
    Connected,
    /// Call finished normally
    Ended,
    /// Callee declined
    Rejected,
}

impl CallStatus {
    /// Wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calling => "calling",
            Self::Answering => "answering",
            Self::Connected => "connected",
            Self::Ended => "ended",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the wire representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calling" => Some(Self::Calling),
            "answering" => Some(Self::Answering),
            "connected" => Some(Self::Connected),
            "ended" => Some(Self::Ended),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Whether this status terminates the call
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Rejected)
    }
}

/// Which side of a call this device is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    const fn candidate_list(self) -> &'static str {
        match self {
            Self::Caller => "caller_candidates",
            Self::Callee => "callee_candidates",
        }
    }

    const fn other(self) -> Self {
        match self {
            Self::Caller => Self::Callee,
            Self::Callee => Self::Caller,
        }
    }
}

/// Signaling change observed by a poll pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalEvent {
    /// Another device is calling us
    IncomingCall { session_id: String, caller: String },
    /// The callee's answer arrived (we are the caller)
    AnswerReceived { session_id: String, sdp: String },
    /// The caller's offer arrived (we accepted an incoming call)
    OfferReceived { session_id: String, sdp: String },
    /// An ICE candidate from the other side, in wire text form
    CandidateReceived { session_id: String, candidate: String },
    /// The call reached a terminal status
    CallEnded {
        session_id: String,
        status: CallStatus,
    },
}

/// Polled signaling client for one device
pub struct CallSignaling {
    store: Arc<dyn SignalStore>,
    device_id: String,
    current_session: Option<String>,
    seen_sessions: HashSet<String>,
    answer_seen: HashSet<String>,
    offer_seen: HashSet<String>,
    ended_seen: HashSet<String>,
    candidates_seen: HashMap<String, HashSet<String>>,
    sweep_day: NaiveDate,
}

impl CallSignaling {
    /// Create a signaling client backed by `store`
    #[must_use]
    pub fn new(store: Arc<dyn SignalStore>, device_id: String) -> Self {
        Self {
            store,
            device_id,
            current_session: None,
            seen_sessions: HashSet::new(),
            answer_seen: HashSet::new(),
            offer_seen: HashSet::new(),
            ended_seen: HashSet::new(),
            candidates_seen: HashMap::new(),
            sweep_day: chrono::Local::now().date_naive(),
        }
    }

    /// Session this device is currently part of
    #[must_use]
    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    /// Role of this device in `record`, if it participates
    fn role_in(&self, record: &Value) -> Option<CallRole> {
        let caller = record.get("caller").and_then(Value::as_str);
        let callee = record.get("callee").and_then(Value::as_str);
        if caller == Some(self.device_id.as_str()) {
            Some(CallRole::Caller)
        } else if callee == Some(self.device_id.as_str()) {
            Some(CallRole::Callee)
        } else {
            None
        }
    }

    /// Announce an outgoing call; returns the new session id.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn create_call(&mut self, callee: &str) -> Result<String> {
        let session_id = format!(
            "{}_{}",
            self.device_id,
            chrono::Utc::now().timestamp_millis()
        );
        let record = json!({
            "caller": self.device_id,
            "callee": callee,
            "status": CallStatus::Calling.as_str(),
            "created_at": chrono::Utc::now().timestamp_millis(),
        });
        self.store
            .put(&format!("{CALLS_PATH}/{session_id}"), record)
            .await?;

        self.seen_sessions.insert(session_id.clone());
        self.current_session = Some(session_id.clone());
        tracing::info!(session_id = %session_id, callee, "call created");
        Ok(session_id)
    }

    /// Publish the caller's offer.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn send_offer(&self, session_id: &str, sdp: &str) -> Result<()> {
        self.store
            .put(
                &format!("{CALLS_PATH}/{session_id}/offer"),
                json!({ "type": "offer", "sdp": sdp }),
            )
            .await
    }

    /// Publish the callee's answer and mark the call connected.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn send_answer(&self, session_id: &str, sdp: &str) -> Result<()> {
        self.store
            .put(
                &format!("{CALLS_PATH}/{session_id}/answer"),
                json!({ "type": "answer", "sdp": sdp }),
            )
            .await?;
        self.set_status(session_id, CallStatus::Connected).await
    }

    /// Append a local ICE candidate to this side's list.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn send_candidate(
        &self,
        session_id: &str,
        role: CallRole,
        candidate: &str,
    ) -> Result<()> {
        self.store
            .push(
                &format!("{CALLS_PATH}/{session_id}/{}", role.candidate_list()),
                json!({ "candidate": candidate }),
            )
            .await?;
        Ok(())
    }

    /// Accept an incoming call; the offer will surface on a later poll.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn accept_call(&mut self, session_id: &str) -> Result<()> {
        self.set_status(session_id, CallStatus::Answering).await?;
        self.current_session = Some(session_id.to_string());
        self.seen_sessions.insert(session_id.to_string());
        tracing::info!(session_id, "call accepted");
        Ok(())
    }

    /// Decline an incoming call.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn reject_call(&mut self, session_id: &str) -> Result<()> {
        self.set_status(session_id, CallStatus::Rejected).await?;
        self.ended_seen.insert(session_id.to_string());
        self.seen_sessions.insert(session_id.to_string());
        tracing::info!(session_id, "call rejected");
        Ok(())
    }

    /// End the current call, if any.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn end_call(&mut self) -> Result<()> {
        let Some(session_id) = self.current_session.take() else {
            return Ok(());
        };
        self.ended_seen.insert(session_id.clone());
        self.set_status(&session_id, CallStatus::Ended).await?;
        tracing::info!(session_id = %session_id, "call ended");
        Ok(())
    }

    async fn set_status(&self, session_id: &str, status: CallStatus) -> Result<()> {
        self.store
            .put(
                &format!("{CALLS_PATH}/{session_id}/status"),
                json!(status.as_str()),
            )
            .await
    }

    /// One poll pass: read the tree, diff against seen-state, emit events.
    ///
    /// Store failures surface as errors; the caller logs and retries on the
    /// next tick.
    ///
    /// # Errors
    ///
    /// Returns an error on store failure.
    pub async fn poll_once(&mut self) -> Result<Vec<SignalEvent>> {
        self.sweep_if_new_day(chrono::Local::now().date_naive());

        let tree = self.store.get(CALLS_PATH).await?;
        let Some(sessions) = tree.as_object() else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for (session_id, record) in sessions {
            let Some(role) = self.role_in(record) else {
                continue;
            };
            let Some(status) = record
                .get("status")
                .and_then(Value::as_str)
                .and_then(CallStatus::parse)
            else {
                tracing::debug!(session_id, "skipping record with bad status");
                continue;
            };

            self.collect_session_events(session_id, record, role, status, &mut events);
        }
        Ok(events)
    }

    fn collect_session_events(
        &mut self,
        session_id: &str,
        record: &Value,
        role: CallRole,
        status: CallStatus,
        events: &mut Vec<SignalEvent>,
    ) {
        // a new incoming call is announced exactly once
        if role == CallRole::Callee
            && status == CallStatus::Calling
            && !self.seen_sessions.contains(session_id)
        {
            self.seen_sessions.insert(session_id.to_string());
            let caller = record
                .get("caller")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            events.push(SignalEvent::IncomingCall {
                session_id: session_id.to_string(),
                caller,
            });
        }

        // descriptions and candidates only matter for the active session
        if self.current_session.as_deref() == Some(session_id) {
            match role {
                CallRole::Caller => {
                    if let Some(sdp) = record.pointer("/answer/sdp").and_then(Value::as_str) {
                        if self.answer_seen.insert(session_id.to_string()) {
                            events.push(SignalEvent::AnswerReceived {
                                session_id: session_id.to_string(),
                                sdp: sdp.to_string(),
                            });
                        }
                    }
                }
                CallRole::Callee => {
                    if let Some(sdp) = record.pointer("/offer/sdp").and_then(Value::as_str) {
                        if self.offer_seen.insert(session_id.to_string()) {
                            events.push(SignalEvent::OfferReceived {
                                session_id: session_id.to_string(),
                                sdp: sdp.to_string(),
                            });
                        }
                    }
                }
            }

            self.collect_candidates(session_id, record, role.other(), events);
        }

        if status.is_terminal() && self.ended_seen.insert(session_id.to_string()) {
            if self.current_session.as_deref() == Some(session_id) {
                self.current_session = None;
            }
            events.push(SignalEvent::CallEnded {
                session_id: session_id.to_string(),
                status,
            });
        }
    }

    /// Emit unseen candidates from `side`'s list, in stored (arrival) order
    fn collect_candidates(
        &mut self,
        session_id: &str,
        record: &Value,
        side: CallRole,
        events: &mut Vec<SignalEvent>,
    ) {
        let Some(list) = record
            .get(side.candidate_list())
            .and_then(Value::as_object)
        else {
            return;
        };

        let seen = self
            .candidates_seen
            .entry(format!("{session_id}/{}", side.candidate_list()))
            .or_default();

        // serde_json maps iterate in sorted key order; push keys are
        // chronological, so this is arrival order
        for (id, entry) in list {
            if seen.contains(id) {
                continue;
            }
            seen.insert(id.clone());

            if let Some(candidate) = entry.get("candidate").and_then(Value::as_str) {
                events.push(SignalEvent::CandidateReceived {
                    session_id: session_id.to_string(),
                    candidate: candidate.to_string(),
                });
            } else {
                tracing::warn!(session_id, id, "dropping malformed candidate entry");
            }
        }
    }

    /// Reset per-day seen-state when the calendar day changes.
    ///
    /// State for the session currently in progress is retained so an active
    /// call cannot replay its own events across midnight.
    pub fn sweep_if_new_day(&mut self, today: NaiveDate) {
        if today == self.sweep_day {
            return;
        }
        tracing::debug!(%today, "sweeping signaling seen-state");
        self.sweep_day = today;

        let keep = self.current_session.clone();
        let retain = |set: &mut HashSet<String>| {
            set.retain(|id| Some(id.as_str()) == keep.as_deref());
        };
        retain(&mut self.seen_sessions);
        retain(&mut self.answer_seen);
        retain(&mut self.offer_seen);
        retain(&mut self.ended_seen);
        self.candidates_seen.retain(|key, _| {
            keep.as_deref()
                .is_some_and(|current| key.starts_with(current))
        });
    }
}
