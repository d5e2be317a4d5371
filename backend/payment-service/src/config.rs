/// Configuration management for the payment service.
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
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

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

/// Simulated gateway behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Card numbers ending in any of these suffixes are declined.
    pub decline_suffixes: Vec<String>,
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
                host: env_or("PAYMENT_SERVICE_HOST", "0.0.0.0"),
                port: parse_or("PAYMENT_SERVICE_PORT", 8081),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "postgresql://localhost/payment_service"),
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
            gateway: GatewayConfig {
                decline_suffixes: env_or("GATEWAY_DECLINE_SUFFIXES", "0002")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
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

fn broker_from_env() -> BrokerSettings {
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
