//! Payment read endpoints and refund.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{AppError, ErrorKind};
use crate::models::Payment;
use crate::services::{PaymentService, ProcessError};

impl From<ProcessError> for ErrorKind {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Domain(domain) => domain.into(),
            ProcessError::Database(sqlx::Error::RowNotFound) => {
                ErrorKind::NotFound("payment".to_string())
            }
            ProcessError::Database(e) => ErrorKind::Database(e),
            ProcessError::Serialization(e) => ErrorKind::Internal(e.into()),
            ProcessError::GatewayUnavailable(msg) => ErrorKind::Internal(anyhow::anyhow!(msg)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub payment_id: String,
    pub transaction_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub masked_card_number: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            payment_id: payment.payment_id,
            transaction_id: payment.transaction_id,
            order_id: payment.order_id,
            customer_id: payment.customer_id,
            amount: payment.amount,
            currency: payment.currency,
            masked_card_number: payment.masked_card_number,
            status: payment.status.as_str(),
            gateway_response: payment.gateway_response,
            error_message: payment.error_message,
            created_at: payment.created_at,
            processed_at: payment.processed_at,
        }
    }
}

pub async fn get_payment(
    req: HttpRequest,
    service: web::Data<PaymentService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let payment_id = path.into_inner();
    let payment = service
        .get_payment(&payment_id)
        .await
        .map_err(|e| AppError::from(ErrorKind::Database(e)).at(req.path()))?
        .ok_or_else(|| AppError::from(ErrorKind::NotFound(payment_id)).at(req.path()))?;

    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

pub async fn get_by_transaction(
    req: HttpRequest,
    service: web::Data<PaymentService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let transaction_id = path.into_inner();
    let payment = service
        .get_by_transaction(&transaction_id)
        .await
        .map_err(|e| AppError::from(ErrorKind::Database(e)).at(req.path()))?
        .ok_or_else(|| AppError::from(ErrorKind::NotFound(transaction_id)).at(req.path()))?;

    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

pub async fn refund_payment(
    req: HttpRequest,
    service: web::Data<PaymentService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let payment = service
        .refund(&path.into_inner())
        .await
        .map_err(|e| AppError::from(ErrorKind::from(e)).at(req.path()))?;

    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}
