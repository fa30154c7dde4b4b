//! In-process gateway for tests and local runs without APNs credentials.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::info;

use crate::client::PushGateway;
use crate::error::GatewayError;
use crate::payload::PushPayload;
use crate::token::mask_token;

/// Records every accepted push; tokens can be scripted to fail.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, PushPayload)>>,
    attempts: Mutex<Vec<String>>,
    failing: HashSet<String>,
    unregistered: HashSet<String>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to `token` fail with a transport error
    pub fn failing_for(mut self, token: impl Into<String>) -> Self {
        self.failing.insert(token.into());
        self
    }

    /// Sends to `token` fail the way APNs reports an unregistered device
    pub fn unregistered(mut self, token: impl Into<String>) -> Self {
        self.unregistered.insert(token.into());
        self
    }

    /// Successful deliveries, in call order
    pub fn sent(&self) -> Vec<(String, PushPayload)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn sent_tokens(&self) -> Vec<String> {
        self.sent().into_iter().map(|(token, _)| token).collect()
    }

    /// Every token a send was attempted for, including failures
    pub fn attempted_tokens(&self) -> Vec<String> {
        self.attempts.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PushGateway for RecordingGateway {
    async fn send(&self, device_token: &str, payload: &PushPayload) -> Result<(), GatewayError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(device_token.to_string());
        }

        if self.failing.contains(device_token) {
            return Err(GatewayError::Transport("scripted failure".to_string()));
        }
        if self.unregistered.contains(device_token) {
            return Err(GatewayError::Rejected {
                status: 410,
                reason: "Unregistered".to_string(),
            });
        }

        info!(token = %mask_token(device_token), post_id = %payload.post_id, "recorded push");
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((device_token.to_string(), payload.clone()));
        }
        Ok(())
    }
}
