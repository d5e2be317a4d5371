//! Processor behavior against in-memory fakes: drain, publish-failure
//! accounting, backoff-guarded retry, poison exclusion, optimistic-race
//! handling, and retention cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use event_schema::{event_type, EventEnvelope};
use transactional_outbox::{
    Clock, OutboxError, OutboxEvent, OutboxProcessor, OutboxPublisher, OutboxRepository,
    OutboxResult, OutboxStats, ProcessorSettings,
};

#[derive(Clone, Copy)]
struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Outbox table in a mutex. Staging happens through the database in
/// production; tests seed rows directly.
struct MemoryRepository {
    rows: Mutex<Vec<OutboxEvent>>,
}

impl MemoryRepository {
    fn seeded(rows: Vec<OutboxEvent>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
        })
    }

    fn row(&self, id: Uuid) -> OutboxEvent {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned()
            .expect("row exists")
    }
}

#[async_trait]
impl OutboxRepository for MemoryRepository {
    async fn insert(
        &self,
        _tx: &mut Transaction<'_, Postgres>,
        _event: &OutboxEvent,
    ) -> OutboxResult<()> {
        unimplemented!("tests seed rows directly")
    }

    async fn fetch_fresh(&self, limit: i64) -> OutboxResult<Vec<OutboxEvent>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.processed && row.retry_count == 0)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn fetch_retryable(
        &self,
        max_retries: i32,
        limit: i64,
    ) -> OutboxResult<Vec<OutboxEvent>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| !row.processed && row.retry_count > 0 && row.retry_count < max_retries)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn mark_processed(&self, event_id: Uuid, version: i32) -> OutboxResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|row| row.id == event_id && row.version == version && !row.processed);
        match row {
            Some(row) => {
                row.processed = true;
                row.processed_at = Some(Utc::now());
                row.last_error = None;
                row.version += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, event_id: Uuid, error: &str) -> OutboxResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|row| row.id == event_id && !row.processed)
            .ok_or(OutboxError::EventNotFound(event_id))?;
        row.retry_count += 1;
        row.last_error = Some(error.to_string());
        row.version += 1;
        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> OutboxResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| !(row.processed && row.processed_at.is_some_and(|at| at < cutoff)));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_exhausted_before(
        &self,
        max_retries: i32,
        cutoff: DateTime<Utc>,
    ) -> OutboxResult<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|row| {
            !(!row.processed && row.retry_count >= max_retries && row.created_at < cutoff)
        });
        Ok((before - rows.len()) as u64)
    }

    async fn stats(&self, max_retries: i32) -> OutboxResult<OutboxStats> {
        let rows = self.rows.lock().unwrap();
        Ok(OutboxStats {
            total: rows.len() as i64,
            unprocessed: rows.iter().filter(|r| !r.processed).count() as i64,
            failed: rows
                .iter()
                .filter(|r| !r.processed && r.retry_count >= max_retries)
                .count() as i64,
            processed: rows.iter().filter(|r| r.processed).count() as i64,
        })
    }
}

/// Publisher that records deliveries, fails on demand, and can simulate a
/// concurrent worker completing the row mid-publish.
#[derive(Default)]
struct RecordingPublisher {
    delivered: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
    race_with: Mutex<Option<Arc<MemoryRepository>>>,
}

impl RecordingPublisher {
    fn delivered(&self) -> Vec<Uuid> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboxPublisher for RecordingPublisher {
    async fn publish(&self, event: &OutboxEvent) -> OutboxResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OutboxError::PublishFailed("broker unavailable".to_string()));
        }
        if let Some(repo) = self.race_with.lock().unwrap().as_ref() {
            // The other worker publishes and marks first.
            let mut rows = repo.rows.lock().unwrap();
            let row = rows.iter_mut().find(|r| r.id == event.id).unwrap();
            row.processed = true;
            row.processed_at = Some(Utc::now());
            row.version += 1;
        }
        self.delivered.lock().unwrap().push(event.id);
        Ok(())
    }
}

fn staged_at(created_at: DateTime<Utc>, retry_count: i32) -> OutboxEvent {
    let envelope = EventEnvelope::new(
        event_type::PAYMENT_REQUESTED,
        "ORD-1",
        "TX-1",
        Some("C1".to_string()),
        "order-service",
    );
    let mut event = OutboxEvent::stage(
        &envelope,
        "order",
        "ORD-1",
        &serde_json::json!({"orderId": "ORD-1"}),
    )
    .unwrap();
    event.created_at = created_at;
    event.retry_count = retry_count;
    event
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn settings() -> ProcessorSettings {
    ProcessorSettings {
        batch_size: 10,
        max_retries: 5,
        drain_interval: Duration::from_millis(10),
        retry_interval: Duration::from_millis(10),
        cleanup_interval: Duration::from_millis(10),
        retention_processed_hours: 24,
        retention_failed_hours: 168,
    }
}

fn processor(
    repo: Arc<MemoryRepository>,
    publisher: Arc<RecordingPublisher>,
    at: DateTime<Utc>,
) -> OutboxProcessor<MemoryRepository, RecordingPublisher, FixedClock> {
    OutboxProcessor::new(repo, publisher, FixedClock(at), settings())
}

#[tokio::test]
async fn drain_publishes_fresh_rows_oldest_first_and_marks_them() {
    let old = staged_at(now() - chrono::Duration::minutes(10), 0);
    let new = staged_at(now() - chrono::Duration::minutes(1), 0);
    let old_id = old.id;
    let new_id = new.id;

    let repo = MemoryRepository::seeded(vec![new, old]);
    let publisher = Arc::new(RecordingPublisher::default());
    let proc = processor(repo.clone(), publisher.clone(), now());

    let published = proc.drain_once().await.unwrap();

    assert_eq!(published, 2);
    assert_eq!(publisher.delivered(), vec![old_id, new_id]);
    let row = repo.row(old_id);
    assert!(row.processed);
    assert!(row.processed_at.is_some());
    assert!(row.last_error.is_none());
    assert_eq!(row.version, 1);
}

#[tokio::test]
async fn publish_failure_records_error_and_leaves_row_unprocessed() {
    let event = staged_at(now(), 0);
    let id = event.id;

    let repo = MemoryRepository::seeded(vec![event]);
    let publisher = Arc::new(RecordingPublisher::default());
    publisher.fail.store(true, Ordering::SeqCst);
    let proc = processor(repo.clone(), publisher.clone(), now());

    let published = proc.drain_once().await.unwrap();

    assert_eq!(published, 0);
    let row = repo.row(id);
    assert!(!row.processed);
    assert_eq!(row.retry_count, 1);
    assert_eq!(row.last_error.as_deref(), Some("Publish failed: broker unavailable"));

    // A failed row leaves the fresh set entirely; only the retry pass may
    // touch it again.
    publisher.fail.store(false, Ordering::SeqCst);
    assert_eq!(proc.drain_once().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_honors_backoff_eligibility() {
    // retry_count = 3 → eligible 8 minutes after created_at.
    let waiting = staged_at(now() - chrono::Duration::minutes(5), 3);
    let due = staged_at(now() - chrono::Duration::minutes(9), 3);
    let due_id = due.id;

    let repo = MemoryRepository::seeded(vec![waiting, due]);
    let publisher = Arc::new(RecordingPublisher::default());
    let proc = processor(repo.clone(), publisher.clone(), now());

    let published = proc.retry_once().await.unwrap();

    assert_eq!(published, 1);
    assert_eq!(publisher.delivered(), vec![due_id]);
}

#[tokio::test]
async fn poison_rows_are_excluded_from_retry() {
    let poison = staged_at(now() - chrono::Duration::hours(2), 5);
    let id = poison.id;

    let repo = MemoryRepository::seeded(vec![poison]);
    let publisher = Arc::new(RecordingPublisher::default());
    let proc = processor(repo.clone(), publisher.clone(), now());

    assert_eq!(proc.retry_once().await.unwrap(), 0);
    assert!(publisher.delivered().is_empty());

    let stats = repo.stats(5).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(repo.row(id).retry_count, 5);
}

#[tokio::test]
async fn optimistic_race_is_not_counted_as_published() {
    let event = staged_at(now(), 0);
    let id = event.id;

    let repo = MemoryRepository::seeded(vec![event]);
    let publisher = Arc::new(RecordingPublisher::default());
    // A concurrent worker completes the row between this worker's fetch and
    // its mark; the version check must then fail quietly.
    *publisher.race_with.lock().unwrap() = Some(repo.clone());
    let proc = processor(repo.clone(), publisher.clone(), now());

    let published = proc.drain_once().await.unwrap();

    assert_eq!(published, 0);
    assert_eq!(publisher.delivered(), vec![id]);
    let row = repo.row(id);
    assert!(row.processed);
    assert_eq!(row.version, 1);
}

#[tokio::test]
async fn cleanup_enforces_both_retention_windows() {
    let mut aged_processed = staged_at(now() - chrono::Duration::hours(48), 0);
    aged_processed.processed = true;
    aged_processed.processed_at = Some(now() - chrono::Duration::hours(30));

    let mut recent_processed = staged_at(now() - chrono::Duration::hours(2), 0);
    recent_processed.processed = true;
    recent_processed.processed_at = Some(now() - chrono::Duration::hours(1));
    let kept_processed = recent_processed.id;

    let aged_poison = staged_at(now() - chrono::Duration::hours(200), 5);
    let recent_poison = staged_at(now() - chrono::Duration::hours(10), 5);
    let kept_poison = recent_poison.id;

    let repo = MemoryRepository::seeded(vec![
        aged_processed,
        recent_processed,
        aged_poison,
        recent_poison,
    ]);
    let publisher = Arc::new(RecordingPublisher::default());
    let proc = processor(repo.clone(), publisher, now());

    let (processed, exhausted) = proc.cleanup_once().await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(exhausted, 1);
    let stats = repo.stats(5).await.unwrap();
    assert_eq!(stats.total, 2);
    assert!(repo.row(kept_processed).processed);
    assert_eq!(repo.row(kept_poison).retry_count, 5);
}
