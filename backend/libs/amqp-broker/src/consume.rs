//! Consumer loop with bounded concurrency and explicit ack control.
//!
//! A dispatcher plugs in as a [`MessageHandler`]. The runner acks on success,
//! nacks without requeue on [`ConsumeError::Reject`] (the queue's DLX then
//! routes the message to its DLQ), and nacks with requeue on
//! [`ConsumeError::Retry`] so the broker redelivers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use tokio::sync::{watch, Semaphore};

use crate::{BrokerResult, BrokerSettings};

/// How a message's processing ended, from the broker's point of view.
#[derive(Debug)]
pub enum ConsumeError {
    /// Non-retryable: malformed payload, validation failure, illegal state.
    /// The message is dead-lettered.
    Reject(anyhow::Error),
    /// Transient: database contention, downstream timeouts. The broker
    /// redelivers.
    Retry(anyhow::Error),
}

impl ConsumeError {
    pub fn reject(err: impl Into<anyhow::Error>) -> Self {
        Self::Reject(err.into())
    }

    pub fn retry(err: impl Into<anyhow::Error>) -> Self {
        Self::Retry(err.into())
    }
}

/// What a handler sees of a delivery.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub body: Vec<u8>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub redelivered: bool,
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one message. Returning `Ok(())` acks it, including the
    /// dropped-duplicate case, which is a successful no-op for the broker.
    async fn handle(&self, message: InboundMessage) -> Result<(), ConsumeError>;
}

/// Runs one queue's consumers until shutdown is signalled.
pub struct ConsumerRunner {
    queue: String,
    consumer_tag: String,
    prefetch: u16,
    concurrency: usize,
}

impl ConsumerRunner {
    pub fn new(settings: &BrokerSettings, queue: &str, consumer_tag: &str) -> Self {
        Self {
            queue: queue.to_string(),
            consumer_tag: consumer_tag.to_string(),
            prefetch: settings.prefetch,
            concurrency: settings.effective_concurrency(),
        }
    }

    /// Consume until `shutdown` flips to `true`. In-flight messages are
    /// finished (acked or nacked) before this returns.
    pub async fn run(
        &self,
        connection: &Connection,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> BrokerResult<()> {
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            queue = %self.queue,
            prefetch = self.prefetch,
            concurrency = self.concurrency,
            "Consumer started"
        );

        let permits = Arc::new(Semaphore::new(self.concurrency));

        loop {
            tokio::select! {
                delivery = consumer.next() => {
                    let delivery = match delivery {
                        Some(Ok(delivery)) => delivery,
                        Some(Err(e)) => {
                            tracing::error!(queue = %self.queue, error = %e, "Consumer stream error");
                            continue;
                        }
                        None => break,
                    };

                    let permit = permits
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("consumer semaphore closed");
                    let handler = handler.clone();
                    let queue = self.queue.clone();

                    tokio::spawn(async move {
                        dispatch(delivery, handler, &queue).await;
                        drop(permit);
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(queue = %self.queue, "Consumer shutting down");
                        break;
                    }
                }
            }
        }

        // Drain: wait for every in-flight handler before dropping the channel.
        let _all = permits
            .acquire_many(self.concurrency as u32)
            .await
            .expect("consumer semaphore closed");

        Ok(())
    }
}

async fn dispatch(delivery: Delivery, handler: Arc<dyn MessageHandler>, queue: &str) {
    let message = InboundMessage {
        body: delivery.data.clone(),
        message_id: delivery.properties.message_id().as_ref().map(|s| s.to_string()),
        correlation_id: delivery
            .properties
            .correlation_id()
            .as_ref()
            .map(|s| s.to_string()),
        redelivered: delivery.redelivered,
    };

    match handler.handle(message).await {
        Ok(()) => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                tracing::error!(queue = %queue, error = %e, "Failed to ack message");
            }
        }
        Err(ConsumeError::Reject(reason)) => {
            tracing::warn!(queue = %queue, error = %reason, "Rejecting message to DLQ");
            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..BasicNackOptions::default()
                })
                .await
            {
                tracing::error!(queue = %queue, error = %e, "Failed to nack message");
            }
        }
        Err(ConsumeError::Retry(reason)) => {
            tracing::warn!(queue = %queue, error = %reason, "Requeueing message for redelivery");
            if let Err(e) = delivery
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
            {
                tracing::error!(queue = %queue, error = %e, "Failed to nack message");
            }
        }
    }
}
