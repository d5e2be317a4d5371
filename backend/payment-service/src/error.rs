/// Error types for the payment service. HTTP responses carry the same
/// envelope as the order service:
/// `{error, message, status, path, timestamp}`.
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Utc;
use thiserror::Error;

use crate::models::PaymentError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("{0}")]
    BadRequest(String),

    #[error("Payment not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    IllegalState(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PaymentError> for ErrorKind {
    fn from(err: PaymentError) -> Self {
        ErrorKind::IllegalState(err.to_string())
    }
}

#[derive(Error, Debug)]
#[error("{kind}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub path: String,
}

impl AppError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: String::new(),
        }
    }

    pub fn at(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::IllegalState(_) => StatusCode::CONFLICT,
            ErrorKind::Database(_) | ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let label = match self.kind {
            ErrorKind::BadRequest(_) => "Bad Request",
            ErrorKind::NotFound(_) => "Not Found",
            ErrorKind::IllegalState(_) => "Conflict",
            ErrorKind::Database(_) | ErrorKind::Internal(_) => "Internal Server Error",
        };

        HttpResponse::build(status).json(serde_json::json!({
            "error": label,
            "message": self.kind.to_string(),
            "status": status.as_u16(),
            "path": self.path,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}
