//! Dispatcher for the payment confirmation queue.
//!
//! Deserialize and validate outside the transaction, then hand the message to
//! the order service, which deduplicates by transaction id and applies the
//! transition atomically. Classification decides the broker outcome:
//! malformed or illegal messages are dead-lettered, infrastructure failures
//! are redelivered.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use amqp_broker::{ConsumeError, InboundMessage, MessageHandler};
use event_schema::PaymentConfirmation;

use crate::services::orders::{ApplyError, ConfirmationOutcome, OrderService};

pub struct ConfirmationConsumer {
    service: Arc<OrderService>,
}

impl ConfirmationConsumer {
    pub fn new(service: Arc<OrderService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for ConfirmationConsumer {
    async fn handle(&self, message: InboundMessage) -> Result<(), ConsumeError> {
        let confirmation: PaymentConfirmation = serde_json::from_slice(&message.body)
            .map_err(|e| ConsumeError::reject(anyhow!("malformed confirmation body: {e}")))?;

        confirmation
            .validate()
            .map_err(ConsumeError::reject)?;

        match self.service.apply_confirmation(&confirmation).await {
            Ok(ConfirmationOutcome::Applied(status)) => {
                tracing::info!(
                    order_id = %confirmation.order_id,
                    transaction_id = %confirmation.transaction_id,
                    status = status.as_str(),
                    message_id = message.message_id.as_deref().unwrap_or(""),
                    "Order transition applied from confirmation"
                );
                Ok(())
            }
            Ok(
                ConfirmationOutcome::DuplicateDropped
                | ConfirmationOutcome::StaleDropped
                | ConfirmationOutcome::Ignored,
            ) => Ok(()),
            Err(err @ ApplyError::OrderNotFound(_)) => Err(ConsumeError::reject(err)),
            Err(err @ ApplyError::Domain(_)) => Err(ConsumeError::reject(err)),
            Err(err @ ApplyError::Serialization(_)) => Err(ConsumeError::reject(err)),
            Err(err @ ApplyError::Conflict(_)) => Err(ConsumeError::retry(err)),
            Err(err @ ApplyError::Database(_)) => Err(ConsumeError::retry(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use event_schema::ConfirmationStatus;

    // Deserialization and validation run before any database access, so the
    // reject paths are testable without infrastructure.

    fn confirmation_json(status: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "paymentId": "P1",
            "transactionId": "TX-1",
            "orderId": "ORD-1",
            "status": status,
            "processedAt": Utc::now().to_rfc3339(),
        }))
        .unwrap()
    }

    #[test]
    fn test_body_parses_into_confirmation() {
        let body = confirmation_json("SUCCESS");
        let parsed: PaymentConfirmation = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.status, ConfirmationStatus::Success);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_malformed_body_is_a_parse_error() {
        assert!(serde_json::from_slice::<PaymentConfirmation>(b"not json").is_err());
        // Unknown status values are also a deserialize failure, not a panic.
        assert!(serde_json::from_slice::<PaymentConfirmation>(&confirmation_json("MAYBE")).is_err());
    }

    #[test]
    fn test_failed_without_error_message_fails_validation() {
        let parsed: PaymentConfirmation =
            serde_json::from_slice(&confirmation_json("FAILED")).unwrap();
        assert!(parsed.validate().is_err());
    }
}
