//! Publishing with full message properties.

use chrono::Utc;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection};

use crate::{BrokerError, BrokerResult, BrokerSettings};

/// Priority written on failure confirmations so they overtake the backlog.
pub const PRIORITY_FAILURE: u8 = 5;
/// Priority for everything else.
pub const PRIORITY_NORMAL: u8 = 1;

/// One message ready for the wire. Header values are flat strings, matching
/// the enumerated header contract.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// Stable across republish of the same outbox row.
    pub message_id: String,
    /// Always the transaction id.
    pub correlation_id: String,
    pub headers: Vec<(String, String)>,
    pub priority: u8,
}

/// Thin wrapper over a confirm-mode channel.
pub struct AmqpPublisher {
    channel: Channel,
    expiration_ms: u32,
}

impl AmqpPublisher {
    /// Create a publisher on its own channel with publisher confirms enabled,
    /// so a publish only succeeds once the broker has taken the message.
    pub async fn new(connection: &Connection, settings: &BrokerSettings) -> BrokerResult<Self> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(Self {
            channel,
            expiration_ms: settings.publish_expiration_ms,
        })
    }

    pub async fn publish(&self, message: &OutboundMessage) -> BrokerResult<()> {
        let mut headers = FieldTable::default();
        for (key, value) in &message.headers {
            headers.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(value.clone().into()),
            );
        }

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from("application/json"))
            .with_delivery_mode(2)
            .with_message_id(ShortString::from(message.message_id.as_str()))
            .with_correlation_id(ShortString::from(message.correlation_id.as_str()))
            .with_timestamp(Utc::now().timestamp() as u64)
            .with_expiration(ShortString::from(self.expiration_ms.to_string().as_str()))
            .with_priority(message.priority)
            .with_headers(headers);

        let confirm = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await?
            .await?;

        match confirm {
            Confirmation::Nack(_) => Err(BrokerError::PublishNacked(format!(
                "exchange={} routing_key={} message_id={}",
                message.exchange, message.routing_key, message.message_id
            ))),
            _ => {
                tracing::debug!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    message_id = %message.message_id,
                    correlation_id = %message.correlation_id,
                    "Message published"
                );
                Ok(())
            }
        }
    }
}
