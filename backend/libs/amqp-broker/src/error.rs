//! Error types for the broker adapter.

use thiserror::Error;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Connection, channel, declaration or protocol failure.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker negatively acknowledged a publish.
    #[error("Publish was nacked by the broker: {0}")]
    PublishNacked(String),

    /// Payload could not be serialized for the wire.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
