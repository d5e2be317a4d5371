//! Order endpoints: create, read, cancel, manual payment retry.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use event_schema::{CreditCard, Money};
use transactional_outbox::SystemClock;

use crate::error::{AppError, ErrorKind};
use crate::jobs::{ManualRetryOutcome, PaymentRetryScheduler};
use crate::models::Order;
use crate::services::orders::{ApplyError, NewOrder, OrderService};

impl From<ApplyError> for ErrorKind {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::OrderNotFound(order_id) => ErrorKind::NotFound(order_id),
            ApplyError::Domain(domain) => domain.into(),
            ApplyError::Conflict(order_id) => {
                ErrorKind::IllegalState(format!("Order {order_id} was modified concurrently"))
            }
            ApplyError::Database(e) => ErrorKind::Database(e),
            ApplyError::Serialization(e) => ErrorKind::Internal(e.into()),
        }
    }
}

fn positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("amount_positive")
            .with_message("amount must be greater than zero".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderCard {
    #[validate(length(min = 12, max = 19, message = "card number must be 12-19 digits"))]
    pub card_number: String,
    #[validate(length(equal = 5, message = "expiry must be MM/YY"))]
    pub expiry_date: String,
    #[validate(length(min = 3, max = 4, message = "cvv must be 3-4 digits"))]
    pub cvv: String,
    #[validate(length(min = 1, message = "card holder name is required"))]
    pub card_holder_name: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "customer id is required"))]
    pub customer_id: String,
    #[validate(custom(function = "positive_amount"))]
    pub amount: Decimal,
    #[validate(length(equal = 3, message = "currency must be an ISO-4217 code"))]
    pub currency: String,
    #[validate(nested)]
    pub credit_card: CreateOrderCard,
    pub billing_address: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.order_id,
            customer_id: order.customer_id,
            amount: order.amount,
            currency: order.currency,
            status: order.status.as_str(),
            transaction_id: order.transaction_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

pub async fn create_order(
    req: HttpRequest,
    service: web::Data<OrderService>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    body.validate()
        .map_err(|e| AppError::from(ErrorKind::Validation(e)).at(req.path()))?;

    // Normalizes scale and re-checks sign/currency invariants.
    let money = Money::new(body.amount, body.currency.clone())
        .map_err(|e| AppError::from(ErrorKind::BadRequest(e.to_string())).at(req.path()))?;
    if money.is_zero() {
        return Err(
            AppError::from(ErrorKind::BadRequest("amount must be greater than zero".into()))
                .at(req.path()),
        );
    }

    let order = service
        .create_order(NewOrder {
            customer_id: body.customer_id,
            amount: money.amount(),
            currency: money.currency().to_string(),
            credit_card: CreditCard {
                card_number: body.credit_card.card_number,
                expiry_date: body.credit_card.expiry_date,
                cvv: body.credit_card.cvv,
                card_holder_name: body.credit_card.card_holder_name,
            },
            billing_address: body.billing_address,
            description: body.description,
        })
        .await
        .map_err(|e| AppError::from(ErrorKind::from(e)).at(req.path()))?;

    Ok(HttpResponse::Created().json(OrderResponse::from(order)))
}

pub async fn get_order(
    req: HttpRequest,
    service: web::Data<OrderService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let order = service
        .get_order(&order_id)
        .await
        .map_err(|e| AppError::from(ErrorKind::Database(e)).at(req.path()))?
        .ok_or_else(|| AppError::from(ErrorKind::NotFound(order_id)).at(req.path()))?;

    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

pub async fn cancel_order(
    req: HttpRequest,
    service: web::Data<OrderService>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let order = service
        .cancel_order(&path.into_inner())
        .await
        .map_err(|e| AppError::from(ErrorKind::from(e)).at(req.path()))?;

    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// Manual retry: same inner step as the scheduler, without the timing guard.
pub async fn retry_payment(
    req: HttpRequest,
    scheduler: web::Data<PaymentRetryScheduler<SystemClock>>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let outcome = scheduler
        .retry_now(&order_id)
        .await
        .map_err(|e| AppError::from(ErrorKind::from(e)).at(req.path()))?;

    match outcome {
        ManualRetryOutcome::Issued { transaction_id } => {
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "orderId": order_id,
                "transactionId": transaction_id,
                "status": "PAYMENT_PENDING",
            })))
        }
        ManualRetryOutcome::Exhausted => Err(AppError::from(ErrorKind::IllegalState(
            "Maximum retry attempts exceeded".into(),
        ))
        .at(req.path())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amount: Decimal) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: "C1".to_string(),
            amount,
            currency: "TWD".to_string(),
            credit_card: CreateOrderCard {
                card_number: "4111111111111111".to_string(),
                expiry_date: "12/30".to_string(),
                cvv: "123".to_string(),
                card_holder_name: "Jo Customer".to_string(),
            },
            billing_address: None,
            description: None,
        }
    }

    #[test]
    fn test_one_cent_is_valid() {
        assert!(request(dec!(0.01)).validate().is_ok());
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let errors = request(dec!(0)).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("amount"));
    }

    #[test]
    fn test_short_card_number_is_rejected() {
        let mut req = request(dec!(10));
        req.credit_card.card_number = "4111".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_currency_length_enforced() {
        let mut req = request(dec!(10));
        req.currency = "TWDX".to_string();
        assert!(req.validate().is_err());
    }
}
