//! Wire schema shared by the order and payment services.
//!
//! Every message that crosses the broker is defined here: the payload bodies
//! (`PaymentRequest`, `PaymentConfirmation`), the envelope metadata that rides
//! in AMQP headers, and the field-level validation the consumer dispatchers
//! apply before touching an aggregate. Both services depend on this crate so
//! that a schema change is a single edit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod card;
pub mod money;
pub mod payment;

pub use card::CreditCard;
pub use money::{Money, MoneyError};
pub use payment::{
    ConfirmationStatus, PaymentConfirmation, PaymentRequest, ValidationError,
};

/// Event type names as they appear in outbox rows and `eventType` headers.
pub mod event_type {
    /// Order service requests a payment attempt (new or retried).
    pub const PAYMENT_REQUESTED: &str = "PaymentRequested";
    /// Payment service reports the outcome of an attempt.
    pub const PAYMENT_CONFIRMATION: &str = "PaymentConfirmation";
    /// Order service records a finalized successful payment.
    pub const PAYMENT_CONFIRMED: &str = "PaymentConfirmed";
    /// Order service records a failed payment attempt.
    pub const PAYMENT_FAILED: &str = "PaymentFailed";
}

/// Schema version stamped into every envelope.
pub const SCHEMA_VERSION: &str = "1";

/// Envelope metadata staged beside an event payload and written into AMQP
/// headers on publish.
///
/// `transaction_id` doubles as the AMQP `correlation_id` and is the primary
/// trace key across both services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event id; reused as the AMQP `message_id` so a republished
    /// outbox row produces a byte-equal message.
    pub event_id: Uuid,
    pub event_type: String,
    pub order_id: String,
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// Emitting service name.
    pub source: String,
    /// Schema version, currently "1".
    pub version: String,
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(
        event_type: &str,
        order_id: impl Into<String>,
        transaction_id: impl Into<String>,
        customer_id: Option<String>,
        source: &str,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            order_id: order_id.into(),
            transaction_id: transaction_id.into(),
            customer_id,
            source: source.to_string(),
            version: SCHEMA_VERSION.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = EventEnvelope::new(
            event_type::PAYMENT_REQUESTED,
            "ORD-1",
            "TX-1",
            Some("C1".to_string()),
            "order-service",
        );

        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();

        assert_eq!(back.event_id, envelope.event_id);
        assert_eq!(back.event_type, "PaymentRequested");
        assert_eq!(back.order_id, "ORD-1");
        assert_eq!(back.transaction_id, "TX-1");
        assert_eq!(back.version, SCHEMA_VERSION);
    }

    #[test]
    fn test_envelope_omits_missing_customer_id() {
        let envelope = EventEnvelope::new(
            event_type::PAYMENT_CONFIRMATION,
            "ORD-2",
            "TX-2",
            None,
            "payment-service",
        );

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("customerId").is_none());
        assert_eq!(json["eventType"], "PaymentConfirmation");
    }
}
