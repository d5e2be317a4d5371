//! Payment aggregate and its state machine.
//!
//! A payment records exactly one attempt, keyed by a transaction id that is
//! unique across all payments. PROCESSING exits to SUCCESS or FAILED; a
//! refund moves SUCCESS to REFUNDED; FAILED is terminal — the order side
//! retries by creating a new payment under a new transaction id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Processing,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSING" => Some(PaymentStatus::Processing),
            "SUCCESS" => Some(PaymentStatus::Success),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Command {command} is illegal in status {status}")]
    IllegalState {
        command: &'static str,
        status: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub payment_id: String,
    /// Unique across all payments; one attempt, one id.
    pub transaction_id: String,
    pub order_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// Card number with all but the brand prefix and last four masked.
    pub masked_card_number: String,
    pub status: PaymentStatus,
    pub gateway_response: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        transaction_id: impl Into<String>,
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        masked_card_number: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_id: Uuid::new_v4().to_string(),
            transaction_id: transaction_id.into(),
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            amount,
            currency: currency.into(),
            masked_card_number: masked_card_number.into(),
            status: PaymentStatus::Processing,
            gateway_response: None,
            error_message: None,
            created_at: now,
            processed_at: None,
        }
    }

    pub fn succeed(
        &mut self,
        gateway_response: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Processing {
            return Err(PaymentError::IllegalState {
                command: "Succeed",
                status: self.status.as_str(),
            });
        }
        self.status = PaymentStatus::Success;
        self.gateway_response = Some(gateway_response.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        error_message: &str,
        gateway_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Processing {
            return Err(PaymentError::IllegalState {
                command: "Fail",
                status: self.status.as_str(),
            });
        }
        self.status = PaymentStatus::Failed;
        self.error_message = Some(error_message.to_string());
        self.gateway_response = gateway_response.map(|s| s.to_string());
        self.processed_at = Some(now);
        Ok(())
    }

    pub fn refund(&mut self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Success {
            return Err(PaymentError::IllegalState {
                command: "Refund",
                status: self.status.as_str(),
            });
        }
        self.status = PaymentStatus::Refunded;
        self.processed_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::create(
            "TX-1",
            "ORD-1",
            "C1",
            dec!(100.00),
            "TWD",
            "4111********1111",
            Utc::now(),
        )
    }

    #[test]
    fn test_processing_exits_to_success() {
        let mut p = payment();
        p.succeed("approved:AUTH-1", Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Success);
        assert!(p.processed_at.is_some());
    }

    #[test]
    fn test_processing_exits_to_failed() {
        let mut p = payment();
        p.fail("card declined", Some("declined:05"), Utc::now())
            .unwrap();
        assert_eq!(p.status, PaymentStatus::Failed);
        assert_eq!(p.error_message.as_deref(), Some("card declined"));
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut p = payment();
        p.fail("declined", None, Utc::now()).unwrap();

        assert!(p.succeed("late", Utc::now()).is_err());
        assert!(p.fail("again", None, Utc::now()).is_err());
        assert!(p.refund(Utc::now()).is_err());
        assert_eq!(p.status, PaymentStatus::Failed);
    }

    #[test]
    fn test_refund_only_from_success() {
        let mut p = payment();
        assert!(p.refund(Utc::now()).is_err());

        p.succeed("approved", Utc::now()).unwrap();
        p.refund(Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);

        // Refunded accepts nothing further.
        assert!(p.succeed("x", Utc::now()).is_err());
        assert!(p.refund(Utc::now()).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            PaymentStatus::Processing,
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
    }
}
