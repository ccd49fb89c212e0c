//! Peer connection abstraction
//!
//! The media stack itself lives outside this crate. The call manager only
//! needs the SDP handshake and candidate plumbing, so that is the whole
//! trait. Local candidates are harvested from the local description when
//! the primitive does not surface them incrementally.

use async_trait::async_trait;

use super::candidate::IceCandidate;
use crate::{Error, Result};

/// Minimal peer-connection surface used by the call manager
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create the local offer and set it as the local description.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack fails.
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer and produce the local answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack fails.
    async fn handle_offer(&self, sdp: &str) -> Result<String>;

    /// Apply the remote answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack fails.
    async fn handle_answer(&self, sdp: &str) -> Result<()>;

    /// Feed a remote ICE candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stack fails.
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Current local description, if one has been set
    async fn local_description(&self) -> Option<String>;

    /// Release media resources; must be safe to call more than once
    async fn close(&self);
}

/// Creates one [`PeerConnection`] per call
pub trait PeerConnectionFactory: Send + Sync {
    /// Build a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns an error when no media stack is available.
    fn create(&self) -> Result<Box<dyn PeerConnection>>;
}

/// Placeholder factory for builds without a media stack; every call attempt
/// fails cleanly
pub struct UnavailablePeerFactory;

impl PeerConnectionFactory for UnavailablePeerFactory {
    fn create(&self) -> Result<Box<dyn PeerConnection>> {
        Err(Error::Call(
            "no peer connection backend configured".to_string(),
        ))
    }
}

/// Extract candidates from `a=candidate:` lines of an SDP blob, dropping
/// malformed lines with a warning
#[must_use]
pub fn candidates_from_sdp(sdp: &str) -> Vec<IceCandidate> {
    sdp.lines()
        .filter(|line| line.starts_with("a=candidate:"))
        .filter_map(|line| match IceCandidate::parse(line) {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                tracing::warn!(error = %e, line, "dropping malformed local candidate");
                None
            }
        })
        .collect()
}
