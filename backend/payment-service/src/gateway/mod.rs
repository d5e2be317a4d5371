//! Payment gateway port and the deterministic simulator used outside
//! production.
//!
//! A decline is a business outcome (the payment fails and a FAILED
//! confirmation goes out); an unavailable gateway is a transient error and
//! the request message is redelivered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use event_schema::CreditCard;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub credit_card: CreditCard,
}

/// Successful authorization.
#[derive(Debug, Clone)]
pub struct GatewayApproval {
    /// Gateway-side reference for reconciliation.
    pub reference: String,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// The gateway refused the charge. Terminal for this attempt.
    #[error("Payment declined ({code}): {message}")]
    Declined { code: String, message: String },

    /// The gateway could not be reached or timed out. Retryable.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayApproval, GatewayError>;
}

/// Deterministic simulator: expired cards and configured card-number
/// suffixes decline, everything else approves.
pub struct SimulatedGateway {
    decline_suffixes: Vec<String>,
}

impl SimulatedGateway {
    pub fn new(decline_suffixes: Vec<String>) -> Self {
        Self { decline_suffixes }
    }

    fn check(&self, request: &ChargeRequest, now: DateTime<Utc>) -> Result<(), GatewayError> {
        if request.credit_card.is_expired(now) {
            return Err(GatewayError::Declined {
                code: "CARD_EXPIRED".to_string(),
                message: format!("card expired {}", request.credit_card.expiry_date),
            });
        }
        if self
            .decline_suffixes
            .iter()
            .any(|suffix| request.credit_card.card_number.ends_with(suffix.as_str()))
        {
            return Err(GatewayError::Declined {
                code: "CARD_DECLINED".to_string(),
                message: "issuer declined the transaction".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayApproval, GatewayError> {
        self.check(request, Utc::now())?;

        let reference = format!("AUTH-{}", &Uuid::new_v4().simple().to_string()[..12]);
        tracing::debug!(
            transaction_id = %request.transaction_id,
            reference = %reference,
            "Simulated gateway approved charge"
        );
        Ok(GatewayApproval { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn request(card_number: &str, expiry: &str) -> ChargeRequest {
        ChargeRequest {
            transaction_id: "TX-1".to_string(),
            amount: dec!(100.00),
            currency: "TWD".to_string(),
            credit_card: CreditCard {
                card_number: card_number.to_string(),
                expiry_date: expiry.to_string(),
                cvv: "123".to_string(),
                card_holder_name: "Jo Customer".to_string(),
            },
        }
    }

    fn gateway() -> SimulatedGateway {
        SimulatedGateway::new(vec!["0002".to_string()])
    }

    #[test]
    fn test_expired_card_declines() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let err = gateway()
            .check(&request("4111111111111111", "07/26"), now)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Declined { code, .. } if code == "CARD_EXPIRED"));
    }

    #[test]
    fn test_decline_suffix_declines() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();
        let err = gateway()
            .check(&request("4000000000000002", "12/30"), now)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Declined { code, .. } if code == "CARD_DECLINED"));
    }

    #[tokio::test]
    async fn test_valid_card_approves_with_reference() {
        let approval = gateway()
            .charge(&request("4111111111111111", "12/30"))
            .await
            .unwrap();
        assert!(approval.reference.starts_with("AUTH-"));
    }
}
