//! Transactional outbox: reliable event publishing for the order and payment
//! services.
//!
//! Events are inserted into the `outbox_events` table in the same database
//! transaction as the aggregate change that produced them, then drained to
//! the broker by a background processor. Any observer that sees the aggregate
//! change is guaranteed to eventually see the event published; a rolled-back
//! transaction publishes nothing.
//!
//! The processor runs three independent tickers (see [`processor`]):
//! drain for fresh rows, retry with capped exponential backoff for failed
//! rows, and cleanup for retention. Delivery is at-least-once; consumers
//! deduplicate by transaction id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use event_schema::EventEnvelope;

pub mod amqp;
pub mod clock;
pub mod error;
pub mod metrics;
pub mod processor;

pub use amqp::AmqpOutboxPublisher;
pub use clock::{Clock, SystemClock};
pub use error::{OutboxError, OutboxResult};
pub use processor::{OutboxProcessor, ProcessorSettings};

/// One staged outbound message.
///
/// Rows are inserted by command handlers inside their own transaction and
/// mutated only by the publisher (`processed`, `processed_at`, `retry_count`,
/// `last_error`, `version`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Event id; reused as the wire `message_id`.
    pub id: Uuid,
    /// Owning aggregate ("order", "payment").
    pub aggregate_type: String,
    /// Aggregate identity (order id or payment id).
    pub aggregate_id: String,
    /// Event type name, e.g. "PaymentRequested".
    pub event_type: String,
    /// Serialized event body, published verbatim.
    pub payload: serde_json::Value,
    /// Serialized [`EventEnvelope`], written into AMQP headers on publish.
    pub headers: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Optimistic lock; bumped on every publisher mutation.
    pub version: i32,
}

impl OutboxEvent {
    /// Stage an event body under its envelope. The caller inserts the result
    /// within the transaction that carries the aggregate write.
    pub fn stage(
        envelope: &EventEnvelope,
        aggregate_type: &str,
        aggregate_id: &str,
        payload: &impl Serialize,
    ) -> OutboxResult<Self> {
        Ok(Self {
            id: envelope.event_id,
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: aggregate_id.to_string(),
            event_type: envelope.event_type.clone(),
            payload: serde_json::to_value(payload)?,
            headers: serde_json::to_value(envelope)?,
            created_at: envelope.occurred_at,
            processed: false,
            processed_at: None,
            retry_count: 0,
            last_error: None,
            version: 0,
        })
    }
}

/// Point-in-time operator counters, surfaced as metrics and a periodic log
/// line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub total: i64,
    pub unprocessed: i64,
    /// Poison rows: unprocessed with `retry_count >= max_retries`.
    pub failed: i64,
    pub processed: i64,
}

/// Storage seam for outbox rows.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a staged event. MUST be called within the transaction that
    /// writes the aggregate change.
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()>;

    /// Oldest unprocessed rows that have never failed (`retry_count = 0`),
    /// `created_at` ascending, event id as tie-breaker.
    async fn fetch_fresh(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>>;

    /// Unprocessed rows with `0 < retry_count < max_retries`, oldest first.
    /// Backoff eligibility is the processor's concern.
    async fn fetch_retryable(&self, max_retries: i32, limit: i64)
        -> OutboxResult<Vec<OutboxEvent>>;

    /// Mark a row processed under its optimistic version. Returns `false`
    /// when the version check fails, meaning a concurrent publisher already
    /// completed (or failed) this row.
    async fn mark_processed(&self, event_id: Uuid, version: i32) -> OutboxResult<bool>;

    /// Record a publish failure: bump `retry_count`, store the error.
    async fn mark_failed(&self, event_id: Uuid, error: &str) -> OutboxResult<()>;

    /// Delete processed rows older than `cutoff`. Returns rows deleted.
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64>;

    /// Delete poison rows (`retry_count >= max_retries`) created before
    /// `cutoff`. Returns rows deleted.
    async fn delete_exhausted_before(
        &self,
        max_retries: i32,
        cutoff: DateTime<Utc>,
    ) -> OutboxResult<u64>;

    async fn stats(&self, max_retries: i32) -> OutboxResult<OutboxStats>;
}

/// Seam toward the broker. Implementations must tolerate being called twice
/// for the same event (at-least-once delivery).
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

/// PostgreSQL implementation over the service's `outbox_events` table.
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<OutboxEvent, sqlx::Error> {
        Ok(OutboxEvent {
            id: row.try_get("id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            headers: row.try_get("headers")?,
            created_at: row.try_get("created_at")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            version: row.try_get("version")?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, aggregate_type, aggregate_id, event_type, payload, headers,
           created_at, processed, processed_at, retry_count, last_error, version
    FROM outbox_events
"#;

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &OutboxEvent,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (
                id, aggregate_type, aggregate_id, event_type, payload, headers,
                created_at, processed, processed_at, retry_count, last_error, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.headers)
        .bind(event.created_at)
        .bind(event.processed)
        .bind(event.processed_at)
        .bind(event.retry_count)
        .bind(&event.last_error)
        .bind(event.version)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            "Event staged in outbox"
        );

        Ok(())
    }

    async fn fetch_fresh(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
            WHERE processed = FALSE AND retry_count = 0
            ORDER BY created_at ASC, id ASC
            LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>, _>>()
            .map_err(OutboxError::from)
    }

    async fn fetch_retryable(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> OutboxResult<Vec<OutboxEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
            WHERE processed = FALSE AND retry_count > 0 AND retry_count < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2"
        ))
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>, _>>()
            .map_err(OutboxError::from)
    }

    async fn mark_processed(&self, event_id: Uuid, version: i32) -> OutboxResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed = TRUE,
                processed_at = NOW(),
                last_error = NULL,
                version = version + 1
            WHERE id = $1 AND version = $2 AND processed = FALSE
            "#,
        )
        .bind(event_id)
        .bind(version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                last_error = $2,
                version = version + 1
            WHERE id = $1 AND processed = FALSE
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::EventNotFound(event_id));
        }

        tracing::warn!(event_id = %event_id, error = %error, "Outbox publish failed");

        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE processed = TRUE AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_exhausted_before(
        &self,
        max_retries: i32,
        cutoff: DateTime<Utc>,
    ) -> OutboxResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM outbox_events
            WHERE processed = FALSE AND retry_count >= $1 AND created_at < $2
            "#,
        )
        .bind(max_retries)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, max_retries: i32) -> OutboxResult<OutboxStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS total,
                COUNT(*) FILTER (WHERE NOT processed)::BIGINT AS unprocessed,
                COUNT(*) FILTER (WHERE NOT processed AND retry_count >= $1)::BIGINT AS failed,
                COUNT(*) FILTER (WHERE processed)::BIGINT AS processed
            FROM outbox_events
            "#,
        )
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            total: row.try_get("total").unwrap_or(0),
            unprocessed: row.try_get("unprocessed").unwrap_or(0),
            failed: row.try_get("failed").unwrap_or(0),
            processed: row.try_get("processed").unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_schema::event_type;

    #[test]
    fn test_stage_carries_envelope_identity() {
        let envelope = EventEnvelope::new(
            event_type::PAYMENT_REQUESTED,
            "ORD-1",
            "TX-1",
            Some("C1".to_string()),
            "order-service",
        );
        let payload = serde_json::json!({"orderId": "ORD-1"});

        let event = OutboxEvent::stage(&envelope, "order", "ORD-1", &payload).unwrap();

        assert_eq!(event.id, envelope.event_id);
        assert_eq!(event.event_type, "PaymentRequested");
        assert_eq!(event.created_at, envelope.occurred_at);
        assert!(!event.processed);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.version, 0);
        assert_eq!(event.headers["transactionId"], "TX-1");
    }
}
