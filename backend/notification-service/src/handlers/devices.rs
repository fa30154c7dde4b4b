/// Device registration, settings and read-receipt handlers
use actix_web::{web, HttpResponse};
use chrono::Utc;
use push_gateway::{mask_token, normalize_device_token, validate_device_token};
use tracing::info;
use validator::Validate;

use super::{ApiResponse, SharedDirectory, SharedReceipts};
use crate::error::{AppError, Result};
use crate::models::{MarkReadRequest, RegisterDeviceRequest, UpdateDeviceRequest};

/// Register a device, or replace the preferences of a known one
///
/// POST /devices
pub async fn register_device(
    directory: web::Data<SharedDirectory>,
    req: web::Json<RegisterDeviceRequest>,
) -> Result<HttpResponse> {
    let mut req = req.into_inner();
    req.device_token = normalize_device_token(&req.device_token);
    req.validate()?;

    let device = req.into_device(Utc::now());
    let stored = directory.upsert_device(device).await?;

    info!(
        token = %mask_token(&stored.token),
        threshold = stored.relevance_threshold,
        categories = stored.categories.len(),
        "Device registered"
    );
    Ok(HttpResponse::Ok().json(ApiResponse::ok(stored)))
}

/// GET /devices/{token}
pub async fn get_device(
    directory: web::Data<SharedDirectory>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let token = normalize_device_token(&path);
    validate_device_token(&token)?;

    match directory.get_device(&token).await? {
        Some(device) => Ok(HttpResponse::Ok().json(ApiResponse::ok(device))),
        None => Err(AppError::NotFound(format!("device {}", mask_token(&token)))),
    }
}

/// Partial settings update
///
/// PUT /devices/{token}
pub async fn update_device(
    directory: web::Data<SharedDirectory>,
    path: web::Path<String>,
    req: web::Json<UpdateDeviceRequest>,
) -> Result<HttpResponse> {
    let token = normalize_device_token(&path);
    validate_device_token(&token)?;
    req.validate()?;

    let device = directory.update_device(&token, &req).await?;
    info!(token = %mask_token(&token), "Device settings updated");
    Ok(HttpResponse::Ok().json(ApiResponse::ok(device)))
}

/// Record that a device has read a post; repeating it is a no-op
///
/// POST /devices/{token}/read
pub async fn mark_read(
    directory: web::Data<SharedDirectory>,
    receipts: web::Data<SharedReceipts>,
    path: web::Path<String>,
    req: web::Json<MarkReadRequest>,
) -> Result<HttpResponse> {
    let token = normalize_device_token(&path);
    validate_device_token(&token)?;
    req.validate()?;

    if directory.get_device(&token).await?.is_none() {
        return Err(AppError::NotFound(format!("device {}", mask_token(&token))));
    }

    let created = receipts.mark_read(&token, &req.post_id).await?;
    if created {
        info!(token = %mask_token(&token), post_id = %req.post_id, "Post marked as read");
    }

    Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
        "postId": req.post_id,
        "created": created,
    }))))
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/devices")
            .route("", web::post().to(register_device))
            .route("/{token}", web::get().to(get_device))
            .route("/{token}", web::put().to(update_device))
            .route("/{token}/read", web::post().to(mark_read)),
    );
}
