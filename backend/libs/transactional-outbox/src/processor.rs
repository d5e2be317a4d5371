//! Background publisher: drain, retry, and cleanup tickers.
//!
//! Drain moves fresh rows to the broker oldest-first. Retry re-attempts
//! failed rows once their capped exponential backoff window has elapsed.
//! Cleanup enforces retention for processed rows and for poison rows that
//! exhausted their retries. The three tickers are independent; a failed row
//! never blocks later rows of the same aggregate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::metrics::OutboxMetrics;
use crate::{Clock, OutboxEvent, OutboxPublisher, OutboxRepository, OutboxResult};

/// Publisher knobs; see the service configuration for the backing keys.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Page size for drain and retry queries.
    pub batch_size: i64,
    /// Poison threshold: rows at or beyond this retry count are left for
    /// cleanup.
    pub max_retries: i32,
    pub drain_interval: Duration,
    pub retry_interval: Duration,
    pub cleanup_interval: Duration,
    /// Age at which processed rows are deleted.
    pub retention_processed_hours: i64,
    /// Age at which poison rows are deleted.
    pub retention_failed_hours: i64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 5,
            drain_interval: Duration::from_secs(5),
            retry_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(3600),
            retention_processed_hours: 24,
            retention_failed_hours: 168,
        }
    }
}

/// Backoff window before a row with `retry_count` failures becomes eligible
/// again: `min(30 minutes, 2^retry_count minutes)` from `created_at`.
pub fn backoff_delay(retry_count: i32) -> chrono::Duration {
    const CAP_MINUTES: i64 = 30;
    let exp = retry_count.clamp(0, 30) as u32;
    let minutes = 2_i64.saturating_pow(exp).min(CAP_MINUTES);
    chrono::Duration::minutes(minutes)
}

/// A failed row is eligible for retry once its backoff window has elapsed.
pub fn is_eligible(event: &OutboxEvent, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(event.created_at) >= backoff_delay(event.retry_count)
}

pub struct OutboxProcessor<R, P, C> {
    repository: Arc<R>,
    publisher: Arc<P>,
    clock: C,
    settings: ProcessorSettings,
    metrics: Option<OutboxMetrics>,
}

impl<R, P, C> OutboxProcessor<R, P, C>
where
    R: OutboxRepository,
    P: OutboxPublisher,
    C: Clock,
{
    pub fn new(repository: Arc<R>, publisher: Arc<P>, clock: C, settings: ProcessorSettings) -> Self {
        Self {
            repository,
            publisher,
            clock,
            settings,
            metrics: None,
        }
    }

    /// Attach prometheus gauges refreshed every drain cycle.
    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run all three tickers until `shutdown` flips to `true`. In-flight rows
    /// finish before this returns.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            batch_size = self.settings.batch_size,
            max_retries = self.settings.max_retries,
            "Outbox processor starting"
        );

        tokio::join!(
            self.drain_loop(shutdown.clone()),
            self.retry_loop(shutdown.clone()),
            self.cleanup_loop(shutdown),
        );

        tracing::info!("Outbox processor stopped");
    }

    async fn drain_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.drain_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(published) if published > 0 => {
                            tracing::info!(published, "Drained outbox batch");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Outbox drain failed"),
                    }
                    self.refresh_stats().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn retry_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.retry_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.retry_once().await {
                        Ok(published) if published > 0 => {
                            tracing::info!(published, "Republished failed outbox rows");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Outbox retry pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn cleanup_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.cleanup_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.cleanup_once().await {
                        Ok((processed, exhausted)) if processed + exhausted > 0 => {
                            tracing::info!(processed, exhausted, "Outbox cleanup removed rows");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Outbox cleanup failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One drain pass over fresh rows. Returns the publish count.
    pub async fn drain_once(&self) -> OutboxResult<usize> {
        let events = self.repository.fetch_fresh(self.settings.batch_size).await?;
        self.publish_batch(events).await
    }

    /// One retry pass over failed rows whose backoff window has elapsed.
    pub async fn retry_once(&self) -> OutboxResult<usize> {
        let now = self.clock.now();
        let events = self
            .repository
            .fetch_retryable(self.settings.max_retries, self.settings.batch_size)
            .await?;

        let eligible: Vec<_> = events
            .into_iter()
            .filter(|event| is_eligible(event, now))
            .collect();

        self.publish_batch(eligible).await
    }

    /// One retention pass. Returns rows deleted as (processed, exhausted).
    pub async fn cleanup_once(&self) -> OutboxResult<(u64, u64)> {
        let now = self.clock.now();

        let processed_cutoff =
            now - chrono::Duration::hours(self.settings.retention_processed_hours);
        let processed = self
            .repository
            .delete_processed_before(processed_cutoff)
            .await?;

        let failed_cutoff = now - chrono::Duration::hours(self.settings.retention_failed_hours);
        let exhausted = self
            .repository
            .delete_exhausted_before(self.settings.max_retries, failed_cutoff)
            .await?;

        Ok((processed, exhausted))
    }

    async fn publish_batch(&self, events: Vec<OutboxEvent>) -> OutboxResult<usize> {
        let mut published = 0;

        for event in events {
            match self.publisher.publish(&event).await {
                Ok(()) => {
                    match self
                        .repository
                        .mark_processed(event.id, event.version)
                        .await
                    {
                        Ok(true) => {
                            published += 1;
                            if let Some(metrics) = &self.metrics {
                                metrics.published.inc();
                            }
                        }
                        Ok(false) => {
                            // Lost the optimistic race: a concurrent publisher
                            // already completed this row. At most one duplicate
                            // delivery; consumers deduplicate.
                            tracing::warn!(
                                event_id = %event.id,
                                "Outbox row already marked by a concurrent publisher"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                event_id = %event.id,
                                error = %e,
                                "Published but failed to mark outbox row processed"
                            );
                        }
                    }
                }
                Err(e) => {
                    if let Err(mark_err) =
                        self.repository.mark_failed(event.id, &e.to_string()).await
                    {
                        tracing::error!(
                            event_id = %event.id,
                            error = %mark_err,
                            "Failed to record outbox publish failure"
                        );
                    }
                }
            }
        }

        Ok(published)
    }

    async fn refresh_stats(&self) {
        match self.repository.stats(self.settings.max_retries).await {
            Ok(stats) => {
                if let Some(metrics) = &self.metrics {
                    metrics.observe(&stats);
                }
                tracing::debug!(
                    total = stats.total,
                    unprocessed = stats.unprocessed,
                    failed = stats.failed,
                    processed = stats.processed,
                    "Outbox stats"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read outbox stats"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use event_schema::{event_type, EventEnvelope};

    fn event_with_retries(retry_count: i32, created_at: DateTime<Utc>) -> OutboxEvent {
        let envelope = EventEnvelope::new(
            event_type::PAYMENT_REQUESTED,
            "ORD-1",
            "TX-1",
            None,
            "order-service",
        );
        let mut event =
            OutboxEvent::stage(&envelope, "order", "ORD-1", &serde_json::json!({})).unwrap();
        event.retry_count = retry_count;
        event.created_at = created_at;
        event
    }

    #[test]
    fn test_backoff_doubles_per_retry() {
        assert_eq!(backoff_delay(0), chrono::Duration::minutes(1));
        assert_eq!(backoff_delay(1), chrono::Duration::minutes(2));
        assert_eq!(backoff_delay(2), chrono::Duration::minutes(4));
        assert_eq!(backoff_delay(3), chrono::Duration::minutes(8));
        assert_eq!(backoff_delay(4), chrono::Duration::minutes(16));
    }

    #[test]
    fn test_backoff_caps_at_thirty_minutes() {
        assert_eq!(backoff_delay(5), chrono::Duration::minutes(30));
        assert_eq!(backoff_delay(10), chrono::Duration::minutes(30));
        // Huge retry counts must not overflow.
        assert_eq!(backoff_delay(i32::MAX), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_eligibility_boundary() {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let event = event_with_retries(2, created);

        // Window is 4 minutes for retry_count = 2.
        let before = created + chrono::Duration::seconds(239);
        let at = created + chrono::Duration::minutes(4);

        assert!(!is_eligible(&event, before));
        assert!(is_eligible(&event, at));
    }
}
