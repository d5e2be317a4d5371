//! Exchange, queue, and DLQ declaration.
//!
//! Two topic exchanges carry the flows (`payment.exchange` toward the payment
//! service, `order.exchange` toward the order service). Each flow queue is
//! durable, TTL- and length-bounded, and dead-letters into `payment.dlx`,
//! which fans out to per-flow DLQs by routing key.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, ExchangeKind};

use crate::{BrokerResult, BrokerSettings};

/// Declare the full topology on the given channel. Safe to call repeatedly.
pub async fn declare(channel: &Channel, settings: &BrokerSettings) -> BrokerResult<()> {
    let durable = ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    };

    for exchange in [
        &settings.payment_exchange,
        &settings.order_exchange,
        &settings.dead_letter_exchange,
    ] {
        channel
            .exchange_declare(exchange, ExchangeKind::Topic, durable, FieldTable::default())
            .await?;
    }

    declare_flow_queue(
        channel,
        settings,
        &settings.payment_request_queue,
        &settings.payment_exchange,
        &settings.payment_request_routing_key,
        &settings.payment_request_failed_routing_key,
    )
    .await?;

    declare_flow_queue(
        channel,
        settings,
        &settings.payment_confirmation_queue,
        &settings.order_exchange,
        &settings.payment_confirmation_routing_key,
        &settings.payment_confirmation_failed_routing_key,
    )
    .await?;

    declare_dlq(
        channel,
        settings,
        &settings.payment_request_dlq,
        &settings.payment_request_failed_routing_key,
    )
    .await?;

    declare_dlq(
        channel,
        settings,
        &settings.payment_confirmation_dlq,
        &settings.payment_confirmation_failed_routing_key,
    )
    .await?;

    Ok(())
}

async fn declare_flow_queue(
    channel: &Channel,
    settings: &BrokerSettings,
    queue: &str,
    exchange: &str,
    routing_key: &str,
    dead_letter_routing_key: &str,
) -> BrokerResult<()> {
    let mut args = FieldTable::default();
    args.insert(
        ShortString::from("x-message-ttl"),
        AMQPValue::LongInt(settings.queue_message_ttl_ms as i32),
    );
    args.insert(
        ShortString::from("x-max-length"),
        AMQPValue::LongInt(settings.queue_max_length as i32),
    );
    args.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(settings.dead_letter_exchange.clone().into()),
    );
    args.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(dead_letter_routing_key.to_string().into()),
    );
    // Priorities 1 (normal) and 5 (failure confirmations) must be honored.
    args.insert(ShortString::from("x-max-priority"), AMQPValue::LongInt(10));

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            args,
        )
        .await?;

    channel
        .queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

async fn declare_dlq(
    channel: &Channel,
    settings: &BrokerSettings,
    queue: &str,
    routing_key: &str,
) -> BrokerResult<()> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            queue,
            &settings.dead_letter_exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}
