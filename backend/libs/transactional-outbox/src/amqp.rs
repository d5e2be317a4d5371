//! AMQP-backed [`OutboxPublisher`].
//!
//! Routes each staged event type to its exchange and routing key, flattens
//! the staged envelope into wire headers, and sets the failure-priority rule:
//! FAILED confirmations publish at priority 5, everything else at 1.

use async_trait::async_trait;

use amqp_broker::publish::{PRIORITY_FAILURE, PRIORITY_NORMAL};
use amqp_broker::{AmqpPublisher, BrokerSettings, OutboundMessage};
use event_schema::event_type;

use crate::{OutboxError, OutboxEvent, OutboxPublisher, OutboxResult};

/// Routing keys for order-side lifecycle events. They publish to the order
/// exchange for interested subscribers; no queue in the fixed topology binds
/// them.
const ORDER_PAYMENT_CONFIRMED_KEY: &str = "order.payment.confirmed";
const ORDER_PAYMENT_FAILED_KEY: &str = "order.payment.failed";

pub struct AmqpOutboxPublisher {
    publisher: AmqpPublisher,
    settings: BrokerSettings,
}

impl AmqpOutboxPublisher {
    pub fn new(publisher: AmqpPublisher, settings: BrokerSettings) -> Self {
        Self {
            publisher,
            settings,
        }
    }

    fn route(&self, event: &OutboxEvent) -> OutboxResult<(String, String)> {
        let route = match event.event_type.as_str() {
            event_type::PAYMENT_REQUESTED => (
                self.settings.payment_exchange.clone(),
                self.settings.payment_request_routing_key.clone(),
            ),
            event_type::PAYMENT_CONFIRMATION => (
                self.settings.order_exchange.clone(),
                self.settings.payment_confirmation_routing_key.clone(),
            ),
            event_type::PAYMENT_CONFIRMED => (
                self.settings.order_exchange.clone(),
                ORDER_PAYMENT_CONFIRMED_KEY.to_string(),
            ),
            event_type::PAYMENT_FAILED => (
                self.settings.order_exchange.clone(),
                ORDER_PAYMENT_FAILED_KEY.to_string(),
            ),
            other => return Err(OutboxError::Unroutable(other.to_string())),
        };
        Ok(route)
    }

    fn priority(event: &OutboxEvent) -> u8 {
        if event.event_type == event_type::PAYMENT_CONFIRMATION
            && event.payload.get("status").and_then(|s| s.as_str()) == Some("FAILED")
        {
            PRIORITY_FAILURE
        } else {
            PRIORITY_NORMAL
        }
    }

    fn headers(event: &OutboxEvent) -> Vec<(String, String)> {
        let field = |name: &str| {
            event
                .headers
                .get(name)
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        };

        let mut headers = vec![
            ("eventType".to_string(), event.event_type.clone()),
            (
                "orderId".to_string(),
                field("orderId").unwrap_or_default(),
            ),
            (
                "transactionId".to_string(),
                field("transactionId").unwrap_or_default(),
            ),
            (
                "source".to_string(),
                field("source").unwrap_or_default(),
            ),
            (
                "version".to_string(),
                field("version").unwrap_or_else(|| "1".to_string()),
            ),
        ];
        if let Some(customer_id) = field("customerId") {
            headers.push(("customerId".to_string(), customer_id));
        }
        headers
    }

    fn correlation_id(event: &OutboxEvent) -> String {
        event
            .headers
            .get("transactionId")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .unwrap_or_else(|| event.id.to_string())
    }
}

#[async_trait]
impl OutboxPublisher for AmqpOutboxPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        let (exchange, routing_key) = self.route(event)?;

        let message = OutboundMessage {
            exchange,
            routing_key,
            body: serde_json::to_vec(&event.payload)?,
            message_id: event.id.to_string(),
            correlation_id: Self::correlation_id(event),
            headers: Self::headers(event),
            priority: Self::priority(event),
        };

        self.publisher
            .publish(&message)
            .await
            .map_err(|e| OutboxError::PublishFailed(e.to_string()))?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            routing_key = %message.routing_key,
            "Outbox event published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::EventEnvelope;

    fn staged(event_type_name: &str, payload: serde_json::Value) -> OutboxEvent {
        let envelope = EventEnvelope::new(
            event_type_name,
            "ORD-1",
            "TX-1",
            Some("C1".to_string()),
            "payment-service",
        );
        OutboxEvent::stage(&envelope, "payment", "P1", &payload).unwrap()
    }

    #[test]
    fn test_failed_confirmations_publish_at_high_priority() {
        let failed = staged(
            event_type::PAYMENT_CONFIRMATION,
            serde_json::json!({"status": "FAILED"}),
        );
        let success = staged(
            event_type::PAYMENT_CONFIRMATION,
            serde_json::json!({"status": "SUCCESS"}),
        );
        let request = staged(event_type::PAYMENT_REQUESTED, serde_json::json!({}));

        assert_eq!(AmqpOutboxPublisher::priority(&failed), PRIORITY_FAILURE);
        assert_eq!(AmqpOutboxPublisher::priority(&success), PRIORITY_NORMAL);
        assert_eq!(AmqpOutboxPublisher::priority(&request), PRIORITY_NORMAL);
    }

    #[test]
    fn test_headers_flatten_the_envelope() {
        let event = staged(event_type::PAYMENT_CONFIRMATION, serde_json::json!({}));
        let headers = AmqpOutboxPublisher::headers(&event);

        let get = |key: &str| {
            headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(get("eventType"), Some("PaymentConfirmation"));
        assert_eq!(get("orderId"), Some("ORD-1"));
        assert_eq!(get("transactionId"), Some("TX-1"));
        assert_eq!(get("customerId"), Some("C1"));
        assert_eq!(get("source"), Some("payment-service"));
        assert_eq!(get("version"), Some("1"));
    }

    #[test]
    fn test_correlation_id_is_transaction_id() {
        let event = staged(event_type::PAYMENT_REQUESTED, serde_json::json!({}));
        assert_eq!(AmqpOutboxPublisher::correlation_id(&event), "TX-1");
    }
}
