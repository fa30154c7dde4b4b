use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use push_gateway::GatewayError;
use thiserror::Error;

use crate::handlers::ApiResponse;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("delivery failed for {token}: {reason}")]
    Delivery { token: String, reason: String },

    #[error("{stage} failed after {elapsed_ms}ms: {message}")]
    Orchestration {
        stage: &'static str,
        elapsed_ms: u128,
        message: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::NotFound(_) => 404,
            AppError::Delivery { .. } => 502,
            AppError::ServiceUnavailable(_) => 503,
            AppError::Orchestration { .. }
            | AppError::Database(_)
            | AppError::Config(_)
            | AppError::Internal => 500,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidToken(reason) => AppError::Validation(reason),
            other => AppError::Delivery {
                token: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self))
            .json(ApiResponse::<()>::err(self.to_string()))
    }
}
