/// Error types for the order service.
///
/// HTTP responses carry the envelope
/// `{error, message, status, path, timestamp, validationErrors?}`.
use std::collections::HashMap;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::Utc;
use thiserror::Error;

use crate::models::OrderError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("Validation failed")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    IllegalState(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// An error plus the request path it surfaced on.
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

    /// Attach the request path for the error envelope.
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

impl From<OrderError> for ErrorKind {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::IllegalState { .. } => ErrorKind::IllegalState(err.to_string()),
            OrderError::TransactionMismatch { .. } => ErrorKind::IllegalState(err.to_string()),
        }
    }
}

impl ErrorKind {
    fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation(_) | ErrorKind::BadRequest(_) => "Bad Request",
            ErrorKind::NotFound(_) => "Not Found",
            ErrorKind::IllegalState(_) => "Conflict",
            ErrorKind::Database(_) | ErrorKind::Internal(_) => "Internal Server Error",
        }
    }

    fn validation_errors(&self) -> Option<HashMap<String, Vec<String>>> {
        match self {
            ErrorKind::Validation(errors) => {
                let mut fields = HashMap::new();
                for (field, errs) in errors.field_errors() {
                    let messages = errs
                        .iter()
                        .map(|e| {
                            e.message
                                .as_ref()
                                .map(|m| m.to_string())
                                .unwrap_or_else(|| e.code.to_string())
                        })
                        .collect();
                    fields.insert(field.to_string(), messages);
                }
                Some(fields)
            }
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation(_) | ErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::IllegalState(_) => StatusCode::CONFLICT,
            ErrorKind::Database(_) | ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        let mut body = serde_json::json!({
            "error": self.kind.label(),
            "message": self.kind.to_string(),
            "status": status.as_u16(),
            "path": self.path,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(validation_errors) = self.kind.validation_errors() {
            body["validationErrors"] = serde_json::json!(validation_errors);
        }

        HttpResponse::build(status).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::new(ErrorKind::NotFound("ORD-1".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::new(ErrorKind::IllegalState("no".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::new(ErrorKind::BadRequest("bad".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_envelope_shape() {
        let err = AppError::new(ErrorKind::NotFound("ORD-9".into())).at("/api/orders/ORD-9");
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
