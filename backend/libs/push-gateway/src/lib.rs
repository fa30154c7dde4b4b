/// Push Gateway Library
///
/// This library provides the outbound push-delivery contract used by the
/// notification dispatch pipeline, plus an Apple Push Notification Service
/// (APNs) implementation of it.
///
/// It handles:
/// - Device token validation and log masking
/// - The wire payload sent for every push (`PushPayload`)
/// - Certificate loading and APNs client construction
/// - Per-message expiry and topic selection
/// - Classification of permanent (invalid token) failures
pub mod client;
pub mod config;
pub mod error;
pub mod payload;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod token;

pub use client::{ApnsGateway, DynPushGateway, LoggingGateway, PushGateway, PUSH_EXPIRY_SECS};
pub use config::ApnsConfig;
pub use error::GatewayError;
pub use payload::PushPayload;
pub use token::{mask_token, normalize_device_token, validate_device_token, DEVICE_TOKEN_LEN};
