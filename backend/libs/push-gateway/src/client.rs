use std::fs::File;
use std::sync::Arc;

use a2::{
    Client, ClientConfig, DefaultNotificationBuilder, Endpoint, NotificationBuilder,
    NotificationOptions, Priority,
};
use chrono::Utc;
use tracing::{debug, error, info};

use crate::config::ApnsConfig;
use crate::error::GatewayError;
use crate::payload::PushPayload;
use crate::token::{mask_token, validate_device_token};

/// Every push expires one hour after it is handed to the provider
pub const PUSH_EXPIRY_SECS: i64 = 3600;

/// Outbound push delivery contract
#[async_trait::async_trait]
pub trait PushGateway: Send + Sync {
    /// Sends one notification to one device
    ///
    /// # Arguments
    /// * `device_token` - 64-character hex APNs device token
    /// * `payload` - Alert text, badge and deep-link data
    ///
    /// # Returns
    /// `Ok(())` if the provider accepted the notification, `Err(GatewayError)` otherwise
    async fn send(&self, device_token: &str, payload: &PushPayload) -> Result<(), GatewayError>;
}

/// Shared trait object handed to dispatchers
pub type DynPushGateway = Arc<dyn PushGateway>;

/// Apple Push Notification Service (APNs) gateway
#[derive(Clone)]
pub struct ApnsGateway {
    inner: Arc<Client>,
    topic: String,
}

impl ApnsGateway {
    /// Creates a new APNs gateway
    ///
    /// # Arguments
    /// * `cfg` - APNs configuration containing certificate path, topic, etc.
    ///
    /// # Returns
    /// `Ok(ApnsGateway)` if initialization succeeds, `Err(GatewayError)` if certificate loading fails
    pub fn new(cfg: &ApnsConfig) -> Result<Self, GatewayError> {
        let mut file = File::open(&cfg.certificate_path)
            .map_err(|e| GatewayError::Config(format!("failed to open certificate file: {e}")))?;

        let password = cfg.certificate_passphrase.as_deref().unwrap_or("");

        let endpoint = if cfg.is_production {
            Endpoint::Production
        } else {
            Endpoint::Sandbox
        };

        let client_config = ClientConfig::new(endpoint);

        let client = Client::certificate(&mut file, password, client_config).map_err(|e| {
            GatewayError::Config(format!("failed to initialize APNs client: {e}"))
        })?;

        info!(
            topic = %cfg.topic,
            production = cfg.is_production,
            "Initialized APNs gateway"
        );

        Ok(Self {
            inner: Arc::new(client),
            topic: cfg.topic.clone(),
        })
    }
}

fn expiry_timestamp() -> u64 {
    (Utc::now().timestamp() + PUSH_EXPIRY_SECS).max(0) as u64
}

#[async_trait::async_trait]
impl PushGateway for ApnsGateway {
    async fn send(&self, device_token: &str, payload: &PushPayload) -> Result<(), GatewayError> {
        validate_device_token(device_token)?;
        let masked = mask_token(device_token);

        let builder = DefaultNotificationBuilder::new()
            .set_title(&payload.title)
            .set_body(&payload.body)
            .set_sound("default")
            .set_badge(payload.badge);

        let options = NotificationOptions {
            apns_topic: Some(&self.topic),
            apns_priority: Some(Priority::High),
            apns_expiration: Some(expiry_timestamp()),
            ..Default::default()
        };

        let custom = payload.custom_data();
        let mut notification = builder.build(device_token, options);
        notification
            .add_custom_data("data", &custom)
            .map_err(|e| GatewayError::Config(format!("failed to encode custom data: {e}")))?;

        match self.inner.send(notification).await {
            Ok(response) => {
                debug!(
                    token = %masked,
                    apns_id = ?response.apns_id,
                    post_id = %payload.post_id,
                    "APNs notification accepted"
                );
                Ok(())
            }
            Err(a2::Error::ResponseError(response)) => {
                let reason = response
                    .error
                    .as_ref()
                    .map(|body| format!("{:?}", body.reason))
                    .unwrap_or_else(|| "unknown".to_string());
                error!(
                    token = %masked,
                    status = response.code,
                    reason = %reason,
                    "APNs rejected notification"
                );
                Err(GatewayError::Rejected {
                    status: response.code,
                    reason,
                })
            }
            Err(e) => {
                error!(token = %masked, error = %e, "APNs send failed");
                Err(GatewayError::Transport(e.to_string()))
            }
        }
    }
}

/// Gateway for runs without APNs credentials: logs each push and keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingGateway;

#[async_trait::async_trait]
impl PushGateway for LoggingGateway {
    async fn send(&self, device_token: &str, payload: &PushPayload) -> Result<(), GatewayError> {
        validate_device_token(device_token)?;
        info!(
            token = %mask_token(device_token),
            post_id = %payload.post_id,
            title = %payload.title,
            "Push not sent, APNs disabled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_one_hour_ahead() {
        let now = Utc::now().timestamp() as u64;
        let expiry = expiry_timestamp();
        assert!(expiry >= now + 3599);
        assert!(expiry <= now + 3601);
    }

    #[test]
    fn test_missing_certificate_is_config_error() {
        let cfg = ApnsConfig::new(
            "/nonexistent/cert.p12".to_string(),
            "com.example.pulse".to_string(),
            false,
        );
        let result = ApnsGateway::new(&cfg);
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_logging_gateway_accepts_valid_tokens_only() {
        let payload = PushPayload {
            post_id: "p1".into(),
            title: "Title".into(),
            body: "Body".into(),
            badge: 1,
            categories: vec![],
            relevance: 9.0,
        };

        assert!(LoggingGateway.send(&"ab".repeat(32), &payload).await.is_ok());
        assert!(LoggingGateway.send("short", &payload).await.is_err());
    }
}
