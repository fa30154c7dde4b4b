/// HTTP handlers for the notification service API
pub mod analytics;
pub mod devices;
pub mod notifications;

use std::sync::Arc;

use actix_web::web;
use serde::{Deserialize, Serialize};

use crate::services::{DeviceDirectory, ReadReceiptStore};

/// Directory handle shared with handlers through `web::Data`
pub type SharedDirectory = Arc<dyn DeviceDirectory>;

/// Receipt store handle shared with handlers through `web::Data`
pub type SharedReceipts = Arc<dyn ReadReceiptStore>;

/// JSON envelope for every non-streaming response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Register every API route
pub fn configure(cfg: &mut web::ServiceConfig) {
    notifications::register_routes(cfg);
    devices::register_routes(cfg);
    analytics::register_routes(cfg);
}
