use actix_web::{web, HttpResponse};
use push_gateway::{mask_token, normalize_device_token};
use tracing::info;
use validator::Validate;

use super::{ApiResponse, SharedDirectory};
use crate::error::Result;
use crate::metrics;
use crate::models::AnalyticsEventRequest;

/// Record an app analytics event; unknown devices are registered with defaults
///
/// POST /analytics
pub async fn record_event(
    directory: web::Data<SharedDirectory>,
    req: web::Json<AnalyticsEventRequest>,
) -> Result<HttpResponse> {
    let mut req = req.into_inner();
    req.device_token = normalize_device_token(&req.device_token);
    req.validate()?;

    let registered = directory.ensure_registered(&req.device_token).await?;
    let kind = req.kind();
    metrics::record_analytics_event(kind);

    info!(
        token = %mask_token(&req.device_token),
        event_type = %req.event_type,
        kind = kind.as_str(),
        post_id = req.post_id.as_deref().unwrap_or("-"),
        has_metadata = req.metadata.is_some(),
        "Analytics event recorded"
    );

    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "recorded": true,
        "registered": registered,
    }))))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/analytics", web::post().to(record_event));
}
