/// Live stream, health and dispatch handlers
use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use push_gateway::normalize_device_token;
use serde::Serialize;
use tracing::debug;
use validator::Validate;

use super::ApiResponse;
use crate::error::Result;
use crate::models::{
    BulkNotifyRequest, NotifyEventRequest, NotifyIngestedRequest, PostNotification,
    TestNotificationRequest,
};
use crate::services::DispatchOrchestrator;
use crate::stream::{ClientId, ConnectionRegistry};

/// Stream health snapshot
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHealth {
    pub healthy: bool,
    pub client_count: usize,
    pub client_ids: Vec<ClientId>,
    pub timestamp: DateTime<Utc>,
}

/// Open a server-sent event stream
///
/// GET /notifications
pub async fn stream_notifications(
    registry: web::Data<ConnectionRegistry>,
) -> Result<HttpResponse> {
    let session = registry.connect()?;
    debug!(client_id = %session.client_id(), "Opening notification stream");

    let body = session.map(|frame| frame.to_sse().map(web::Bytes::from));

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::CONNECTION, "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}

/// GET /notifications/health
pub async fn stream_health(registry: web::Data<ConnectionRegistry>) -> HttpResponse {
    let stats = registry.stats();
    let health = StreamHealth {
        healthy: registry.healthy(),
        client_count: stats.count,
        client_ids: stats.client_ids,
        timestamp: stats.timestamp,
    };

    if health.healthy {
        HttpResponse::Ok().json(health)
    } else {
        HttpResponse::ServiceUnavailable().json(health)
    }
}

/// Send a fixed push to one device
///
/// POST /notifications/test
pub async fn send_test_notification(
    orchestrator: web::Data<Arc<DispatchOrchestrator>>,
    req: web::Json<TestNotificationRequest>,
) -> Result<HttpResponse> {
    let mut req = req.into_inner();
    req.device_token = normalize_device_token(&req.device_token);
    req.validate()?;
    orchestrator.send_test_notification(&req.device_token).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({ "sent": true }))))
}

/// POST /internal/notify/post
pub async fn notify_post(
    orchestrator: web::Data<Arc<DispatchOrchestrator>>,
    req: web::Json<PostNotification>,
) -> Result<HttpResponse> {
    let outcome = orchestrator.notify_post(&req).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}

/// POST /internal/notify/event
pub async fn notify_event(
    orchestrator: web::Data<Arc<DispatchOrchestrator>>,
    req: web::Json<NotifyEventRequest>,
) -> Result<HttpResponse> {
    let outcome = orchestrator
        .notify_event(&req.event, req.average_relevance)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}

/// POST /internal/notify/ingested
pub async fn notify_ingested(
    orchestrator: web::Data<Arc<DispatchOrchestrator>>,
    req: web::Json<NotifyIngestedRequest>,
) -> Result<HttpResponse> {
    let outcome = orchestrator
        .notify_ingested_post(&req.post, &req.categories)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(outcome)))
}

/// Dispatch many posts; runs to completion before responding
///
/// POST /internal/notify/bulk
pub async fn notify_bulk(
    orchestrator: web::Data<Arc<DispatchOrchestrator>>,
    req: web::Json<BulkNotifyRequest>,
) -> Result<HttpResponse> {
    req.validate()?;
    let summary = orchestrator.send_bulk(&req.posts).await;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(summary)))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/notifications")
            .route("", web::get().to(stream_notifications))
            .route("/health", web::get().to(stream_health))
            .route("/test", web::post().to(send_test_notification)),
    )
    .service(
        web::scope("/internal/notify")
            .route("/post", web::post().to(notify_post))
            .route("/event", web::post().to(notify_event))
            .route("/ingested", web::post().to(notify_ingested))
            .route("/bulk", web::post().to(notify_bulk)),
    );
}
