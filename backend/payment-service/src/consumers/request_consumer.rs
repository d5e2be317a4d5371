//! Dispatcher for the payment request queue.
//!
//! Malformed or invalid requests are dead-lettered without touching the
//! database. Gateway unavailability and database failures are redelivered;
//! a gateway decline is a business outcome, not an error.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use amqp_broker::{ConsumeError, InboundMessage, MessageHandler};
use event_schema::PaymentRequest;

use crate::services::{PaymentService, ProcessError, ProcessOutcome};

pub struct RequestConsumer {
    service: Arc<PaymentService>,
}

impl RequestConsumer {
    pub fn new(service: Arc<PaymentService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for RequestConsumer {
    async fn handle(&self, message: InboundMessage) -> Result<(), ConsumeError> {
        let request: PaymentRequest = serde_json::from_slice(&message.body)
            .map_err(|e| ConsumeError::reject(anyhow!("malformed payment request body: {e}")))?;

        request.validate().map_err(ConsumeError::reject)?;

        match self.service.process_request(&request).await {
            Ok(ProcessOutcome::Completed(status)) => {
                tracing::info!(
                    transaction_id = %request.transaction_id,
                    order_id = %request.order_id,
                    status = status.as_str(),
                    message_id = message.message_id.as_deref().unwrap_or(""),
                    redelivered = message.redelivered,
                    "Payment request processed"
                );
                Ok(())
            }
            Ok(ProcessOutcome::DuplicateDropped) => Ok(()),
            Err(err @ ProcessError::GatewayUnavailable(_)) => Err(ConsumeError::retry(err)),
            Err(err @ ProcessError::Database(_)) => Err(ConsumeError::retry(err)),
            Err(err @ ProcessError::Serialization(_)) => Err(ConsumeError::reject(err)),
            Err(err @ ProcessError::Domain(_)) => Err(ConsumeError::reject(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request_json() -> serde_json::Value {
        serde_json::json!({
            "transactionId": "TX-1",
            "orderId": "ORD-1",
            "customerId": "C1",
            "amount": "100.00",
            "currency": "TWD",
            "creditCard": {
                "cardNumber": "4111111111111111",
                "expiryDate": "12/30",
                "cvv": "123",
                "cardHolderName": "Jo Customer",
            },
            "merchantId": "M1",
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    #[test]
    fn test_wire_body_parses_and_validates() {
        let body = serde_json::to_vec(&request_json()).unwrap();
        let parsed: PaymentRequest = serde_json::from_slice(&body).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.transaction_id, "TX-1");
    }

    #[test]
    fn test_missing_card_fails_deserialization() {
        let mut body = request_json();
        body.as_object_mut().unwrap().remove("creditCard");
        let bytes = serde_json::to_vec(&body).unwrap();
        assert!(serde_json::from_slice::<PaymentRequest>(&bytes).is_err());
    }

    #[test]
    fn test_zero_amount_fails_validation() {
        let mut body = request_json();
        body["amount"] = serde_json::json!("0.00");
        let parsed: PaymentRequest =
            serde_json::from_slice(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert!(parsed.validate().is_err());
    }
}
