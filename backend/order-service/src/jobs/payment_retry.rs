//! Payment retry scheduler.
//!
//! A periodic pass over orders whose latest attempt failed, plus
//! PAYMENT_PENDING orders that timed out. Attempts are budgeted per order in
//! a durable `RetryHistory` row; each issued retry mints a new transaction
//! id, stages a fresh `PaymentRequested`, and schedules the next eligibility
//! window with capped exponential backoff. Exhaustion finalizes the order.
//!
//! The manual retry command runs the same inner step without the timing
//! guard; attempt-count and status guards still apply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use uuid::Uuid;

use event_schema::{event_type, EventEnvelope, PaymentRequest};
use transactional_outbox::{Clock, OutboxEvent, OutboxRepository, SqlxOutboxRepository};

use crate::config::RetryConfig;
use crate::db::{order_repo, payment_request_repo, retry_repo, PaymentRequestRecord};
use crate::models::{Order, RetryHistory};
use crate::services::orders::{ApplyError, AGGREGATE_TYPE, SOURCE};

pub const EXHAUSTED_REASON: &str = "Maximum retry attempts exceeded";

/// What the scheduler should do with one order's retry history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Backoff window has not elapsed.
    NotDue,
    /// Attempt budget spent; finalize the order.
    Exhausted,
    /// Issue a retry under a new transaction id.
    Issue,
}

/// Attempt-count guard, then timing guard. A history with no `next_retry_at`
/// (first retry) is immediately eligible.
pub fn decide(
    history: &RetryHistory,
    max_attempts: i32,
    now: DateTime<Utc>,
    bypass_timing: bool,
) -> RetryDecision {
    if history.attempt_count >= max_attempts {
        return RetryDecision::Exhausted;
    }
    if !bypass_timing {
        if let Some(next_retry_at) = history.next_retry_at {
            if now < next_retry_at {
                return RetryDecision::NotDue;
            }
        }
    }
    RetryDecision::Issue
}

/// Delay before attempt `attempt_count` becomes eligible:
/// `min(30, 2^attempt_count * base_delay) minutes`.
pub fn retry_backoff(attempt_count: i32, base_delay_minutes: i64) -> chrono::Duration {
    const CAP_MINUTES: i64 = 30;
    let exp = attempt_count.clamp(0, 30) as u32;
    let minutes = 2_i64
        .saturating_pow(exp)
        .saturating_mul(base_delay_minutes.max(1))
        .min(CAP_MINUTES);
    chrono::Duration::minutes(minutes)
}

/// Outcome of one manual retry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualRetryOutcome {
    Issued { transaction_id: String },
    Exhausted,
}

pub struct PaymentRetryScheduler<C> {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
    settings: RetryConfig,
    clock: C,
}

impl<C: Clock> PaymentRetryScheduler<C> {
    pub fn new(
        pool: PgPool,
        outbox: Arc<SqlxOutboxRepository>,
        settings: RetryConfig,
        clock: C,
    ) -> Self {
        Self {
            pool,
            outbox,
            settings,
            clock,
        }
    }

    /// Run until shutdown. One pass per tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.settings.interval_secs));
        tracing::info!(
            max_attempts = self.settings.max_attempts,
            base_delay_minutes = self.settings.base_delay_minutes,
            "Payment retry scheduler starting"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.pass_once().await {
                        Ok((issued, exhausted)) if issued + exhausted > 0 => {
                            tracing::info!(issued, exhausted, "Payment retry pass complete");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Payment retry pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Payment retry scheduler stopped");
                        break;
                    }
                }
            }
        }
    }

    /// One scheduler pass. Returns (retries issued, orders exhausted).
    pub async fn pass_once(&self) -> Result<(usize, usize), ApplyError> {
        let now = self.clock.now();
        let timeout_cutoff = now - chrono::Duration::minutes(self.settings.timeout_minutes);

        let mut candidates =
            order_repo::find_failed_orders(&self.pool, self.settings.batch_size).await?;
        candidates.extend(
            order_repo::find_timed_out_orders(&self.pool, timeout_cutoff, self.settings.batch_size)
                .await?,
        );

        let mut issued = 0;
        let mut exhausted = 0;

        for order in candidates {
            match self.process_order(order, now).await {
                Ok(Some(RetryDecision::Issue)) => issued += 1,
                Ok(Some(RetryDecision::Exhausted)) => exhausted += 1,
                Ok(_) => {}
                Err(e) => {
                    // One bad order must not starve the rest of the pass.
                    tracing::error!(error = %e, "Retry processing failed for order");
                }
            }
        }

        Ok((issued, exhausted))
    }

    async fn process_order(
        &self,
        mut order: Order,
        now: DateTime<Utc>,
    ) -> Result<Option<RetryDecision>, ApplyError> {
        let current_tx = order.transaction_id.clone().unwrap_or_default();

        let (mut history, is_new) =
            match retry_repo::find_by_order(&self.pool, &order.order_id).await? {
                Some(history) => {
                    if history.status.is_terminal() {
                        return Ok(None);
                    }
                    (history, false)
                }
                None => (RetryHistory::new(&order.order_id, &current_tx, now), true),
            };

        let decision = decide(&history, self.settings.max_attempts, now, false);
        match decision {
            RetryDecision::NotDue => Ok(None),
            RetryDecision::Exhausted => {
                self.exhaust(&mut order, &mut history, is_new, now).await?;
                Ok(Some(RetryDecision::Exhausted))
            }
            RetryDecision::Issue => {
                self.issue(&mut order, &mut history, is_new, now).await?;
                Ok(Some(RetryDecision::Issue))
            }
        }
    }

    /// Manual retry: same inner step, no timing guard. The order must be in
    /// PAYMENT_FAILED.
    pub async fn retry_now(&self, order_id: &str) -> Result<ManualRetryOutcome, ApplyError> {
        let now = self.clock.now();
        let mut order = order_repo::find_order(&self.pool, order_id)
            .await?
            .ok_or_else(|| ApplyError::OrderNotFound(order_id.to_string()))?;

        let current_tx = order.transaction_id.clone().unwrap_or_default();
        let (mut history, is_new) = match retry_repo::find_by_order(&self.pool, order_id).await? {
            Some(history) if history.status.is_terminal() => {
                return Ok(ManualRetryOutcome::Exhausted);
            }
            Some(history) => (history, false),
            None => (RetryHistory::new(order_id, &current_tx, now), true),
        };

        match decide(&history, self.settings.max_attempts, now, true) {
            RetryDecision::Exhausted => {
                self.exhaust(&mut order, &mut history, is_new, now).await?;
                Ok(ManualRetryOutcome::Exhausted)
            }
            _ => {
                let transaction_id = self.issue(&mut order, &mut history, is_new, now).await?;
                Ok(ManualRetryOutcome::Issued { transaction_id })
            }
        }
    }

    /// Budget spent: fail the order with the terminal reason, stage the
    /// event, and finalize the history. One transaction.
    async fn exhaust(
        &self,
        order: &mut Order,
        history: &mut RetryHistory,
        is_new: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ApplyError> {
        let current_tx = order.transaction_id.clone().unwrap_or_default();
        let event = order.fail_payment(EXHAUSTED_REASON, &current_tx, now)?;

        let envelope = EventEnvelope::new(
            event_type::PAYMENT_FAILED,
            &order.order_id,
            &current_tx,
            Some(order.customer_id.clone()),
            SOURCE,
        );
        let payload = match &event {
            crate::models::OrderEvent::PaymentFailed {
                order_id,
                transaction_id,
                reason,
            } => serde_json::json!({
                "orderId": order_id,
                "transactionId": transaction_id,
                "reason": reason,
            }),
            _ => unreachable!("fail_payment emits PaymentFailed"),
        };
        let staged = OutboxEvent::stage(&envelope, AGGREGATE_TYPE, &order.order_id, &payload)?;

        history.mark_finally_failed(EXHAUSTED_REASON);

        let mut tx = self.pool.begin().await?;
        if !order_repo::update_order(&mut tx, order).await? {
            return Err(ApplyError::Conflict(order.order_id.clone()));
        }
        if is_new {
            retry_repo::insert_history(&mut tx, history).await?;
        } else if !retry_repo::update_history(&mut tx, history).await? {
            return Err(ApplyError::Conflict(order.order_id.clone()));
        }
        self.outbox.insert(&mut tx, &staged).await?;
        tx.commit().await?;

        tracing::warn!(
            order_id = %order.order_id,
            attempts = history.attempt_count,
            "Payment retries exhausted; order finally failed"
        );

        Ok(())
    }

    /// Issue one retry: rotate the transaction id, rebuild the request body
    /// from the audit trail, stage it, and schedule the next window.
    async fn issue(
        &self,
        order: &mut Order,
        history: &mut RetryHistory,
        is_new: bool,
        now: DateTime<Utc>,
    ) -> Result<String, ApplyError> {
        let template = payment_request_repo::find_latest_by_order(&self.pool, &order.order_id)
            .await?
            .ok_or_else(|| {
                ApplyError::Database(sqlx::Error::Protocol(format!(
                    "no payment request on record for order {}",
                    order.order_id
                )))
            })?;

        let transaction_id = Uuid::new_v4().to_string();
        order.retry_payment(&transaction_id, now)?;

        let credit_card = serde_json::from_value(template.card.clone())?;
        let request = PaymentRequest {
            transaction_id: transaction_id.clone(),
            order_id: order.order_id.clone(),
            customer_id: order.customer_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            credit_card,
            billing_address: None,
            merchant_id: template.merchant_id.clone(),
            description: template.description.clone(),
            timestamp: now,
        };

        let envelope = EventEnvelope::new(
            event_type::PAYMENT_REQUESTED,
            &order.order_id,
            &transaction_id,
            Some(order.customer_id.clone()),
            SOURCE,
        );
        let staged = OutboxEvent::stage(&envelope, AGGREGATE_TYPE, &order.order_id, &request)?;

        let audit = PaymentRequestRecord {
            id: Uuid::new_v4(),
            order_id: order.order_id.clone(),
            transaction_id: transaction_id.clone(),
            customer_id: order.customer_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            card: template.card,
            merchant_id: template.merchant_id,
            description: template.description,
            created_at: now,
        };

        let delay = retry_backoff(history.attempt_count + 1, self.settings.base_delay_minutes);
        let attempt = history.record_attempt(&transaction_id, now, now + delay);

        let mut tx = self.pool.begin().await?;
        if !order_repo::update_order(&mut tx, order).await? {
            return Err(ApplyError::Conflict(order.order_id.clone()));
        }
        if is_new {
            retry_repo::insert_history(&mut tx, history).await?;
        } else if !retry_repo::update_history(&mut tx, history).await? {
            return Err(ApplyError::Conflict(order.order_id.clone()));
        }
        retry_repo::insert_attempt(&mut tx, &attempt).await?;
        payment_request_repo::insert(&mut tx, &audit).await?;
        self.outbox.insert(&mut tx, &staged).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.order_id,
            transaction_id = %transaction_id,
            attempt = history.attempt_count,
            next_retry_at = %history.next_retry_at.unwrap_or(now),
            "Payment retry issued"
        );

        Ok(transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn history_with(attempts: i32, next_retry_at: Option<DateTime<Utc>>) -> RetryHistory {
        let mut history = RetryHistory::new("ORD-1", "TX-1", now());
        history.attempt_count = attempts;
        history.next_retry_at = next_retry_at;
        history
    }

    #[test]
    fn test_first_retry_is_immediately_eligible() {
        let history = history_with(0, None);
        assert_eq!(decide(&history, 5, now(), false), RetryDecision::Issue);
    }

    #[test]
    fn test_waits_for_backoff_window() {
        let history = history_with(2, Some(now() + chrono::Duration::minutes(3)));
        assert_eq!(decide(&history, 5, now(), false), RetryDecision::NotDue);

        // Window elapsed.
        let history = history_with(2, Some(now() - chrono::Duration::seconds(1)));
        assert_eq!(decide(&history, 5, now(), false), RetryDecision::Issue);
    }

    #[test]
    fn test_manual_retry_bypasses_timing_only() {
        let waiting = history_with(2, Some(now() + chrono::Duration::minutes(3)));
        assert_eq!(decide(&waiting, 5, now(), true), RetryDecision::Issue);

        let spent = history_with(5, None);
        assert_eq!(decide(&spent, 5, now(), true), RetryDecision::Exhausted);
    }

    #[test]
    fn test_exhaustion_at_max_attempts_boundary() {
        // The fifth attempt still runs...
        let history = history_with(4, None);
        assert_eq!(decide(&history, 5, now(), false), RetryDecision::Issue);

        // ...and the next pass finalizes.
        let history = history_with(5, None);
        assert_eq!(decide(&history, 5, now(), false), RetryDecision::Exhausted);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(retry_backoff(1, 1), chrono::Duration::minutes(2));
        assert_eq!(retry_backoff(2, 1), chrono::Duration::minutes(4));
        assert_eq!(retry_backoff(3, 1), chrono::Duration::minutes(8));
        assert_eq!(retry_backoff(4, 1), chrono::Duration::minutes(16));
        assert_eq!(retry_backoff(5, 1), chrono::Duration::minutes(30));
        assert_eq!(retry_backoff(30, 1), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_backoff_is_monotone_until_cap() {
        let mut last = chrono::Duration::zero();
        for attempt in 1..=10 {
            let delay = retry_backoff(attempt, 1);
            assert!(delay >= last, "backoff shrank at attempt {attempt}");
            last = delay;
        }
    }

    #[test]
    fn test_backoff_scales_with_base_delay() {
        assert_eq!(retry_backoff(1, 2), chrono::Duration::minutes(4));
        assert_eq!(retry_backoff(2, 5), chrono::Duration::minutes(20));
        assert_eq!(retry_backoff(3, 5), chrono::Duration::minutes(30));
    }
}
