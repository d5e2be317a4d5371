//! Payment message bodies and the required-field rules the consumer
//! dispatchers apply before any aggregate is touched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::card::CreditCard;

/// A field-level problem in an inbound message. Non-retryable: the dispatcher
/// routes the message to the DLQ.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid message: {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ValidationError {
    fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "required field is missing or empty",
        }
    }
}

/// Request for one payment attempt, keyed by `transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub transaction_id: String,
    pub order_id: String,
    pub customer_id: String,
    /// Decimal string with two fractional digits on the wire.
    pub amount: Decimal,
    /// ISO-4217 code.
    pub currency: String,
    pub credit_card: CreditCard,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_address: Option<String>,
    pub merchant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PaymentRequest {
    /// Required-field check for the payment-side dispatcher.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.transaction_id.is_empty() {
            return Err(ValidationError::missing("transactionId"));
        }
        if self.order_id.is_empty() {
            return Err(ValidationError::missing("orderId"));
        }
        if self.customer_id.is_empty() {
            return Err(ValidationError::missing("customerId"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError {
                field: "amount",
                reason: "must be positive",
            });
        }
        if self.currency.is_empty() {
            return Err(ValidationError::missing("currency"));
        }
        if self.credit_card.card_number.is_empty() {
            return Err(ValidationError::missing("creditCard.cardNumber"));
        }
        if self.credit_card.expiry_date.is_empty() {
            return Err(ValidationError::missing("creditCard.expiryDate"));
        }
        if self.credit_card.cvv.is_empty() {
            return Err(ValidationError::missing("creditCard.cvv"));
        }
        if self.merchant_id.is_empty() {
            return Err(ValidationError::missing("merchantId"));
        }
        Ok(())
    }
}

/// Outcome of a payment attempt as reported by the payment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    Success,
    Failed,
    Pending,
    Cancelled,
}

impl std::fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfirmationStatus::Success => write!(f, "SUCCESS"),
            ConfirmationStatus::Failed => write!(f, "FAILED"),
            ConfirmationStatus::Pending => write!(f, "PENDING"),
            ConfirmationStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub transaction_id: String,
    pub order_id: String,
    pub status: ConfirmationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl PaymentConfirmation {
    /// Required-field check for the order-side dispatcher.
    ///
    /// SUCCESS requires a payment id; FAILED requires an error message.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_id.is_empty() {
            return Err(ValidationError::missing("orderId"));
        }
        if self.transaction_id.is_empty() {
            return Err(ValidationError::missing("transactionId"));
        }
        match self.status {
            ConfirmationStatus::Success => {
                if self.payment_id.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::missing("paymentId"));
                }
            }
            ConfirmationStatus::Failed => {
                if self.error_message.as_deref().unwrap_or("").is_empty() {
                    return Err(ValidationError::missing("errorMessage"));
                }
            }
            ConfirmationStatus::Pending | ConfirmationStatus::Cancelled => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> PaymentRequest {
        PaymentRequest {
            transaction_id: "TX-1".to_string(),
            order_id: "ORD-1".to_string(),
            customer_id: "C1".to_string(),
            amount: dec!(100.00),
            currency: "TWD".to_string(),
            credit_card: CreditCard {
                card_number: "4111111111111111".to_string(),
                expiry_date: "12/30".to_string(),
                cvv: "123".to_string(),
                card_holder_name: "Jo Customer".to_string(),
            },
            billing_address: None,
            merchant_id: "M1".to_string(),
            description: None,
            timestamp: Utc::now(),
        }
    }

    fn confirmation(status: ConfirmationStatus) -> PaymentConfirmation {
        PaymentConfirmation {
            payment_id: Some("P1".to_string()),
            transaction_id: "TX-1".to_string(),
            order_id: "ORD-1".to_string(),
            status,
            amount: Some(dec!(100.00)),
            currency: Some("TWD".to_string()),
            gateway_response: Some("approved".to_string()),
            error_message: None,
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_request_round_trip() {
        let req = request();
        let json = serde_json::to_string(&req).unwrap();
        let back: PaymentRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(back.transaction_id, req.transaction_id);
        assert_eq!(back.order_id, req.order_id);
        assert_eq!(back.amount, req.amount);
        assert_eq!(back.credit_card.card_number, req.credit_card.card_number);
    }

    #[test]
    fn test_request_amount_serialized_as_string() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["amount"], "100.00");
        assert_eq!(json["creditCard"]["expiryDate"], "12/30");
    }

    #[test]
    fn test_request_validation_rejects_zero_amount() {
        let mut req = request();
        req.amount = dec!(0);
        assert_eq!(req.validate().unwrap_err().field, "amount");
    }

    #[test]
    fn test_request_validation_rejects_missing_cvv() {
        let mut req = request();
        req.credit_card.cvv.clear();
        assert_eq!(req.validate().unwrap_err().field, "creditCard.cvv");
    }

    #[test]
    fn test_confirmation_status_wire_format() {
        let json = serde_json::to_value(confirmation(ConfirmationStatus::Success)).unwrap();
        assert_eq!(json["status"], "SUCCESS");
    }

    #[test]
    fn test_success_requires_payment_id() {
        let mut conf = confirmation(ConfirmationStatus::Success);
        conf.payment_id = None;
        assert_eq!(conf.validate().unwrap_err().field, "paymentId");
    }

    #[test]
    fn test_failed_requires_error_message() {
        let mut conf = confirmation(ConfirmationStatus::Failed);
        conf.error_message = None;
        assert_eq!(conf.validate().unwrap_err().field, "errorMessage");

        conf.error_message = Some("card declined".to_string());
        assert!(conf.validate().is_ok());
    }

    #[test]
    fn test_pending_needs_only_identifiers() {
        let mut conf = confirmation(ConfirmationStatus::Pending);
        conf.payment_id = None;
        conf.error_message = None;
        assert!(conf.validate().is_ok());

        conf.transaction_id.clear();
        assert_eq!(conf.validate().unwrap_err().field, "transactionId");
    }
}
