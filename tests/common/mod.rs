//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pendant_gateway::Result;
use pendant_gateway::call::candidate::IceCandidate;
use pendant_gateway::call::peer::{PeerConnection, PeerConnectionFactory};
use pendant_gateway::config::SessionConfig;
use pendant_gateway::session::transport::{ChannelConnector, ChannelRemote, Connector, Transport};

/// Session configuration with short, test-friendly timeouts
pub fn session_config() -> SessionConfig {
    SessionConfig {
        url: "wss://example.invalid/v1/realtime".to_string(),
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        voice: "alloy".to_string(),
        instructions: "You are a test.".to_string(),
        reconnect_base_secs: 2.0,
        max_reconnect_attempts: 5,
        reset_timeout_secs: 30,
        voice_message_timeout_secs: 60,
    }
}

/// Connector that fails the first `failures` connect calls, then behaves
/// like a [`ChannelConnector`]
pub struct FlakyConnector {
    failures_left: AtomicU32,
    inner: ChannelConnector,
}

impl FlakyConnector {
    pub fn new(
        failures: u32,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<ChannelRemote>) {
        let (inner, remotes) = ChannelConnector::new();
        (
            Self {
                failures_left: AtomicU32::new(failures),
                inner,
            },
            remotes,
        )
    }
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(pendant_gateway::Error::Transport(
                "injected connect failure".to_string(),
            ));
        }
        self.inner.connect().await
    }
}

/// Scripted peer connection that records every candidate it is handed
pub struct FakePeer {
    pub added: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
    offer: String,
    answer: String,
    local: Mutex<Option<String>>,
}

impl FakePeer {
    fn new(added: Arc<Mutex<Vec<String>>>, closed: Arc<AtomicBool>) -> Self {
        Self {
            added,
            closed,
            offer: "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n\
                    a=candidate:10 1 udp 200 10.0.0.1 4000 typ host\r\n"
                .to_string(),
            answer: "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\n\
                     a=candidate:20 1 udp 200 10.0.0.2 4100 typ host\r\n"
                .to_string(),
            local: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<String> {
        *self.local.lock().unwrap() = Some(self.offer.clone());
        Ok(self.offer.clone())
    }

    async fn handle_offer(&self, _sdp: &str) -> Result<String> {
        *self.local.lock().unwrap() = Some(self.answer.clone());
        Ok(self.answer.clone())
    }

    async fn handle_answer(&self, _sdp: &str) -> Result<()> {
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.added.lock().unwrap().push(candidate.to_string());
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.local.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`FakePeer`]s that share one candidate log
pub struct FakePeerFactory {
    pub added: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl FakePeerFactory {
    pub fn new() -> Self {
        Self {
            added: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl PeerConnectionFactory for FakePeerFactory {
    fn create(&self) -> Result<Box<dyn PeerConnection>> {
        Ok(Box::new(FakePeer::new(
            Arc::clone(&self.added),
            Arc::clone(&self.closed),
        )))
    }
}
