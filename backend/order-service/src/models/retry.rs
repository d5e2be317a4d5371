//! Durable retry state for failed or timed-out payments.
//!
//! One `RetryHistory` row per order, optimistic-locked so a manual retry and
//! a scheduler pass cannot both issue an attempt. Each issued transaction id
//! is recorded as a `RetryAttempt` child row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryStatus {
    Pending,
    Retrying,
    Successful,
    FinallyFailed,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "PENDING",
            RetryStatus::Retrying => "RETRYING",
            RetryStatus::Successful => "SUCCESSFUL",
            RetryStatus::FinallyFailed => "FINALLY_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RetryStatus::Pending),
            "RETRYING" => Some(RetryStatus::Retrying),
            "SUCCESSFUL" => Some(RetryStatus::Successful),
            "FINALLY_FAILED" => Some(RetryStatus::FinallyFailed),
            _ => None,
        }
    }

    /// Terminal histories are never picked up again by the scheduler.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryStatus::Successful | RetryStatus::FinallyFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryHistory {
    pub id: Uuid,
    pub order_id: String,
    /// Transaction id of the very first attempt, recorded once.
    pub original_transaction_id: String,
    /// Transaction id of the latest issued attempt.
    pub current_transaction_id: String,
    pub attempt_count: i32,
    pub status: RetryStatus,
    pub first_attempt_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub final_failure_reason: Option<String>,
    pub version: i32,
}

impl RetryHistory {
    pub fn new(order_id: &str, original_transaction_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order_id.to_string(),
            original_transaction_id: original_transaction_id.to_string(),
            current_transaction_id: original_transaction_id.to_string(),
            attempt_count: 0,
            status: RetryStatus::Pending,
            first_attempt_at: now,
            last_attempt_at: None,
            next_retry_at: None,
            final_failure_reason: None,
            version: 0,
        }
    }

    /// Record an issued retry and schedule the next eligibility window.
    pub fn record_attempt(
        &mut self,
        transaction_id: &str,
        now: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    ) -> RetryAttempt {
        self.attempt_count += 1;
        self.current_transaction_id = transaction_id.to_string();
        self.status = RetryStatus::Retrying;
        self.last_attempt_at = Some(now);
        self.next_retry_at = Some(next_retry_at);

        RetryAttempt {
            id: Uuid::new_v4(),
            history_id: self.id,
            transaction_id: transaction_id.to_string(),
            attempt_number: self.attempt_count,
            created_at: now,
        }
    }

    pub fn mark_successful(&mut self) {
        self.status = RetryStatus::Successful;
        self.next_retry_at = None;
    }

    pub fn mark_finally_failed(&mut self, reason: &str) {
        self.status = RetryStatus::FinallyFailed;
        self.next_retry_at = None;
        self.final_failure_reason = Some(reason.to_string());
    }
}

/// One issued retry, keyed by the transaction id it rotated in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub id: Uuid,
    pub history_id: Uuid,
    pub transaction_id: String,
    pub attempt_number: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_attempt_increments_and_rotates() {
        let now = Utc::now();
        let mut history = RetryHistory::new("ORD-1", "TX-1", now);

        let attempt = history.record_attempt("TX-2", now, now + chrono::Duration::minutes(2));

        assert_eq!(history.attempt_count, 1);
        assert_eq!(history.current_transaction_id, "TX-2");
        assert_eq!(history.original_transaction_id, "TX-1");
        assert_eq!(history.status, RetryStatus::Retrying);
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.transaction_id, "TX-2");
    }

    #[test]
    fn test_finally_failed_clears_next_retry() {
        let now = Utc::now();
        let mut history = RetryHistory::new("ORD-1", "TX-1", now);
        history.record_attempt("TX-2", now, now + chrono::Duration::minutes(2));

        history.mark_finally_failed("Maximum retry attempts exceeded");

        assert_eq!(history.status, RetryStatus::FinallyFailed);
        assert!(history.next_retry_at.is_none());
        assert_eq!(
            history.final_failure_reason.as_deref(),
            Some("Maximum retry attempts exceeded")
        );
        assert!(history.status.is_terminal());
    }
}
