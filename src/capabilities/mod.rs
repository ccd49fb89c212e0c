//! Device capability registry
//!
//! Capabilities are the tools the model can invoke: camera, music, calls,
//! voice messages, whatever the device offers. Each is registered once at
//! startup with a typed descriptor; dispatch goes through the registry by
//! name. Handler failures never escape as errors: the model always gets a
//! result it can speak to, and the session stays up.

pub mod builtin;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Value, json};

use crate::Result;

/// Capabilities that block on hardware or network and must run off the
/// session event loop
const SLOW_CAPABILITIES: &[&str] = &["camera_capture", "voice_send_photo", "photo_send"];

/// A tool the model can invoke on the device
#[async_trait]
pub trait Capability: Send + Sync {
    /// Tool name exposed to the model
    fn name(&self) -> &str;

    /// Human-readable description for the tool schema
    fn description(&self) -> &str;

    /// JSON schema of the tool parameters
    fn parameters(&self) -> Value;

    /// Whether the capability can run on this device (checked once, at
    /// registration)
    fn available(&self) -> bool {
        true
    }

    /// Execute the capability.
    ///
    /// # Errors
    ///
    /// May fail; the registry converts failures into a generic unsuccessful
    /// result before they reach the model.
    async fn execute(&self, args: Value) -> Result<CapabilityResult>;
}

/// Outcome of a capability invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityResult {
    /// Whether the operation succeeded
    pub success: bool,
    /// Message for the model to relay
    pub message: String,
    /// Optional structured payload (side-channel flags, captured data)
    pub data: Option<Value>,
}

impl CapabilityResult {
    /// Successful result with a message
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    /// Failed result with a message
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Attach a structured payload
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Whether the result asks the engine to arm voice-message recording
    #[must_use]
    pub fn requests_voice_recording(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("start_voice_recording"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Serialize for a `function_call_output` item
    #[must_use]
    pub fn to_output_json(&self) -> String {
        let mut output = json!({
            "success": self.success,
            "message": self.message,
        });
        if let Some(data) = &self.data {
            output["data"] = data.clone();
        }
        output.to_string()
    }
}

/// Name-indexed set of registered capabilities
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    slow: HashSet<String>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        let slow = SLOW_CAPABILITIES
            .iter()
            .map(ToString::to_string)
            .collect();
        Self {
            capabilities: HashMap::new(),
            slow,
        }
    }

    /// Register a capability; unavailable ones are skipped with a log line
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if !capability.available() {
            tracing::info!(capability = %name, "capability unavailable on this device, skipping");
            return;
        }
        tracing::debug!(capability = %name, "capability registered");
        self.capabilities.insert(name, capability);
    }

    /// Whether a capability with this name is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Whether this capability must run off the session event loop
    #[must_use]
    pub fn is_slow(&self, name: &str) -> bool {
        self.slow.contains(name)
    }

    /// Number of registered capabilities
    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Tool schema entries for the session handshake
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.capabilities
            .values()
            .map(|c| {
                json!({
                    "type": "function",
                    "name": c.name(),
                    "description": c.description(),
                    "parameters": c.parameters(),
                })
            })
            .collect()
    }

    /// Execute a capability by name.
    ///
    /// Never returns an error: unknown names yield a not-found result, and
    /// handler errors or panics become a generic failure the model can
    /// relay without leaking internals.
    pub async fn execute(&self, name: &str, args: Value) -> CapabilityResult {
        let Some(capability) = self.capabilities.get(name) else {
            tracing::warn!(capability = %name, "unknown capability requested");
            return CapabilityResult::fail(format!("no capability named {name}"));
        };

        let outcome = std::panic::AssertUnwindSafe(capability.execute(args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(capability = %name, error = %e, "capability failed");
                CapabilityResult::fail("the operation could not be completed")
            }
            Err(_) => {
                tracing::error!(capability = %name, "capability panicked");
                CapabilityResult::fail("the operation could not be completed")
            }
        }
    }
}
