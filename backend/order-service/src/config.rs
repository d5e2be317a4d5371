/// Configuration management for the order service.
///
/// Everything is environment-driven with local-development defaults, loaded
/// once at startup.
use std::time::Duration;

use amqp_broker::BrokerSettings;
use serde::{Deserialize, Serialize};
use transactional_outbox::ProcessorSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerSettings,
    pub outbox: OutboxConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
    /// Merchant identifier stamped on outgoing payment requests.
    pub merchant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Outbox publisher knobs (drain/retry page size, poison threshold,
/// retention, tick intervals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    pub batch_size: i64,
    pub max_retries: i32,
    pub retention_processed_hours: i64,
    pub retention_failed_hours: i64,
    pub drain_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub cleanup_interval_secs: u64,
}

/// Payment retry scheduler knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: i32,
    pub base_delay_minutes: i64,
    /// PAYMENT_PENDING orders older than this are treated as timed out.
    pub timeout_minutes: i64,
    pub batch_size: i64,
    pub interval_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Config {
            app: AppConfig {
                env: env_or("APP_ENV", "development"),
                host: env_or("ORDER_SERVICE_HOST", "0.0.0.0"),
                port: parse_or("ORDER_SERVICE_PORT", 8080),
                merchant_id: env_or("MERCHANT_ID", "MERCHANT-001"),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "postgresql://localhost/order_service"),
                max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 20),
            },
            broker: broker_from_env(),
            outbox: OutboxConfig {
                batch_size: parse_or("OUTBOX_BATCH_SIZE", 50),
                max_retries: parse_or("OUTBOX_MAX_RETRIES", 5),
                retention_processed_hours: parse_or("OUTBOX_RETENTION_PROCESSED_HOURS", 24),
                retention_failed_hours: parse_or("OUTBOX_RETENTION_FAILED_HOURS", 168),
                drain_interval_secs: parse_or("OUTBOX_DRAIN_INTERVAL_SECS", 5),
                retry_interval_secs: parse_or("OUTBOX_RETRY_INTERVAL_SECS", 30),
                cleanup_interval_secs: parse_or("OUTBOX_CLEANUP_INTERVAL_SECS", 3600),
            },
            retry: RetryConfig {
                max_attempts: parse_or("PAYMENT_RETRY_MAX_ATTEMPTS", 5),
                base_delay_minutes: parse_or("PAYMENT_RETRY_BASE_DELAY_MINUTES", 1),
                timeout_minutes: parse_or("PAYMENT_RETRY_TIMEOUT_MINUTES", 30),
                batch_size: parse_or("PAYMENT_RETRY_BATCH_SIZE", 20),
                interval_secs: parse_or("PAYMENT_RETRY_INTERVAL_SECS", 60),
            },
        })
    }
}

impl OutboxConfig {
    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            drain_interval: Duration::from_secs(self.drain_interval_secs),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            retention_processed_hours: self.retention_processed_hours,
            retention_failed_hours: self.retention_failed_hours,
        }
    }
}

/// Broker settings shared by both services, assembled from `AMQP_*` overrides
/// over the deployed defaults.
pub fn broker_from_env() -> BrokerSettings {
    let defaults = BrokerSettings::default();
    BrokerSettings {
        url: env_or("AMQP_URL", &defaults.url),
        payment_exchange: env_or("AMQP_PAYMENT_EXCHANGE", &defaults.payment_exchange),
        order_exchange: env_or("AMQP_ORDER_EXCHANGE", &defaults.order_exchange),
        dead_letter_exchange: env_or("AMQP_DEAD_LETTER_EXCHANGE", &defaults.dead_letter_exchange),
        payment_request_queue: env_or("AMQP_PAYMENT_REQUEST_QUEUE", &defaults.payment_request_queue),
        payment_confirmation_queue: env_or(
            "AMQP_PAYMENT_CONFIRMATION_QUEUE",
            &defaults.payment_confirmation_queue,
        ),
        payment_request_dlq: env_or("AMQP_PAYMENT_REQUEST_DLQ", &defaults.payment_request_dlq),
        payment_confirmation_dlq: env_or(
            "AMQP_PAYMENT_CONFIRMATION_DLQ",
            &defaults.payment_confirmation_dlq,
        ),
        payment_request_routing_key: defaults.payment_request_routing_key,
        payment_confirmation_routing_key: defaults.payment_confirmation_routing_key,
        payment_request_failed_routing_key: defaults.payment_request_failed_routing_key,
        payment_confirmation_failed_routing_key: defaults.payment_confirmation_failed_routing_key,
        queue_message_ttl_ms: defaults.queue_message_ttl_ms,
        queue_max_length: defaults.queue_max_length,
        publish_expiration_ms: defaults.publish_expiration_ms,
        prefetch: parse_or("CONSUMER_PREFETCH", defaults.prefetch),
        concurrency: parse_or("CONSUMER_CONCURRENCY", defaults.concurrency),
    }
}
