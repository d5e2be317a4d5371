//! Order aggregate and its state machine.
//!
//! Command methods validate the transition and return the emitted event; the
//! caller persists the aggregate and stages the event in the outbox within
//! one transaction. There is no shared event buffer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod retry;

pub use retry::{RetryAttempt, RetryHistory, RetryStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    PaymentPending,
    PaymentConfirmed,
    PaymentFailed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::PaymentConfirmed => "PAYMENT_CONFIRMED",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(OrderStatus::Created),
            "PAYMENT_PENDING" => Some(OrderStatus::PaymentPending),
            "PAYMENT_CONFIRMED" => Some(OrderStatus::PaymentConfirmed),
            "PAYMENT_FAILED" => Some(OrderStatus::PaymentFailed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OrderError {
    #[error("Command {command} is illegal in status {status}")]
    IllegalState {
        command: &'static str,
        status: &'static str,
    },

    #[error("Transaction id mismatch: expected {expected}, got {actual}")]
    TransactionMismatch { expected: String, actual: String },
}

/// Events emitted by order transitions, staged to the outbox by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    PaymentRequested {
        order_id: String,
        transaction_id: String,
        customer_id: String,
    },
    PaymentConfirmed {
        order_id: String,
        transaction_id: String,
        payment_id: String,
    },
    PaymentFailed {
        order_id: String,
        transaction_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    /// Identifier of the in-flight payment attempt; rotates on retry. Empty
    /// only in CREATED and CANCELLED.
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic lock, bumped by every persisted mutation.
    pub version: i32,
}

impl Order {
    pub fn create(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            amount,
            currency: currency.into(),
            status: OrderStatus::Created,
            transaction_id: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn current_transaction(&self) -> &str {
        self.transaction_id.as_deref().unwrap_or("")
    }

    fn guard_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<(), OrderError> {
        if self.current_transaction() != transaction_id {
            return Err(OrderError::TransactionMismatch {
                expected: self.current_transaction().to_string(),
                actual: transaction_id.to_string(),
            });
        }
        Ok(())
    }

    /// First payment request for this order. Legal from CREATED and from
    /// PAYMENT_FAILED (a fresh attempt after failure).
    pub fn request_payment(
        &mut self,
        transaction_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        match self.status {
            OrderStatus::Created | OrderStatus::PaymentFailed => {
                let transaction_id = transaction_id.into();
                self.status = OrderStatus::PaymentPending;
                self.transaction_id = Some(transaction_id.clone());
                self.updated_at = now;
                Ok(OrderEvent::PaymentRequested {
                    order_id: self.order_id.clone(),
                    transaction_id,
                    customer_id: self.customer_id.clone(),
                })
            }
            status => Err(OrderError::IllegalState {
                command: "RequestPayment",
                status: status.as_str(),
            }),
        }
    }

    /// Scheduler-issued retry under a rotated transaction id. Also legal from
    /// PAYMENT_PENDING so a timed-out attempt can be superseded.
    pub fn retry_payment(
        &mut self,
        transaction_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        match self.status {
            OrderStatus::PaymentFailed | OrderStatus::PaymentPending => {
                let transaction_id = transaction_id.into();
                self.status = OrderStatus::PaymentPending;
                self.transaction_id = Some(transaction_id.clone());
                self.updated_at = now;
                Ok(OrderEvent::PaymentRequested {
                    order_id: self.order_id.clone(),
                    transaction_id,
                    customer_id: self.customer_id.clone(),
                })
            }
            status => Err(OrderError::IllegalState {
                command: "RetryPayment",
                status: status.as_str(),
            }),
        }
    }

    /// Finalize a successful attempt. The confirmation must carry the
    /// current transaction id; a stale one is a mismatch and is dropped by
    /// the consumer.
    pub fn confirm_payment(
        &mut self,
        payment_id: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        if self.status != OrderStatus::PaymentPending {
            return Err(OrderError::IllegalState {
                command: "ConfirmPayment",
                status: self.status.as_str(),
            });
        }
        self.guard_transaction(transaction_id)?;

        self.status = OrderStatus::PaymentConfirmed;
        self.updated_at = now;
        Ok(OrderEvent::PaymentConfirmed {
            order_id: self.order_id.clone(),
            transaction_id: transaction_id.to_string(),
            payment_id: payment_id.to_string(),
        })
    }

    /// Record a failed attempt. Legal from PAYMENT_PENDING; also accepted in
    /// PAYMENT_FAILED so retry exhaustion can restate the terminal reason.
    pub fn fail_payment(
        &mut self,
        reason: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderEvent, OrderError> {
        match self.status {
            OrderStatus::PaymentPending | OrderStatus::PaymentFailed => {
                self.guard_transaction(transaction_id)?;
                self.status = OrderStatus::PaymentFailed;
                self.updated_at = now;
                Ok(OrderEvent::PaymentFailed {
                    order_id: self.order_id.clone(),
                    transaction_id: transaction_id.to_string(),
                    reason: reason.to_string(),
                })
            }
            status => Err(OrderError::IllegalState {
                command: "FailPayment",
                status: status.as_str(),
            }),
        }
    }

    /// Cancel an order that has no live payment attempt.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Created | OrderStatus::PaymentFailed => {
                self.status = OrderStatus::Cancelled;
                self.updated_at = now;
                Ok(())
            }
            status => Err(OrderError::IllegalState {
                command: "Cancel",
                status: status.as_str(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::create("ORD-1", "C1", dec!(100.00), "TWD", Utc::now())
    }

    fn pending_order(tx: &str) -> Order {
        let mut order = order();
        order.request_payment(tx, Utc::now()).unwrap();
        order
    }

    #[test]
    fn test_request_payment_from_created() {
        let mut order = order();
        let event = order.request_payment("TX-1", Utc::now()).unwrap();

        assert_eq!(order.status, OrderStatus::PaymentPending);
        assert_eq!(order.transaction_id.as_deref(), Some("TX-1"));
        assert_eq!(
            event,
            OrderEvent::PaymentRequested {
                order_id: "ORD-1".into(),
                transaction_id: "TX-1".into(),
                customer_id: "C1".into(),
            }
        );
    }

    #[test]
    fn test_confirm_requires_matching_transaction() {
        let mut order = pending_order("TX-1");
        let err = order
            .confirm_payment("P1", "TX-0", Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrderError::TransactionMismatch { .. }));
        assert_eq!(order.status, OrderStatus::PaymentPending);
    }

    #[test]
    fn test_confirm_finalizes_order() {
        let mut order = pending_order("TX-1");
        let event = order.confirm_payment("P1", "TX-1", Utc::now()).unwrap();

        assert_eq!(order.status, OrderStatus::PaymentConfirmed);
        assert_eq!(
            event,
            OrderEvent::PaymentConfirmed {
                order_id: "ORD-1".into(),
                transaction_id: "TX-1".into(),
                payment_id: "P1".into(),
            }
        );
    }

    #[test]
    fn test_confirmed_is_terminal_for_confirm() {
        let mut order = pending_order("TX-1");
        order.confirm_payment("P1", "TX-1", Utc::now()).unwrap();

        let err = order.confirm_payment("P1", "TX-1", Utc::now()).unwrap_err();
        assert_eq!(
            err,
            OrderError::IllegalState {
                command: "ConfirmPayment",
                status: "PAYMENT_CONFIRMED",
            }
        );
    }

    #[test]
    fn test_fail_then_retry_rotates_transaction() {
        let mut order = pending_order("TX-1");
        order.fail_payment("declined", "TX-1", Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::PaymentFailed);

        let event = order.retry_payment("TX-2", Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::PaymentPending);
        assert_eq!(order.transaction_id.as_deref(), Some("TX-2"));
        assert!(matches!(
            event,
            OrderEvent::PaymentRequested { transaction_id, .. } if transaction_id == "TX-2"
        ));
    }

    #[test]
    fn test_retry_supersedes_timed_out_pending_attempt() {
        let mut order = pending_order("TX-1");
        order.retry_payment("TX-2", Utc::now()).unwrap();
        assert_eq!(order.transaction_id.as_deref(), Some("TX-2"));
    }

    #[test]
    fn test_fail_on_failed_restates_reason() {
        let mut order = pending_order("TX-1");
        order.fail_payment("declined", "TX-1", Utc::now()).unwrap();

        let event = order
            .fail_payment("Maximum retry attempts exceeded", "TX-1", Utc::now())
            .unwrap();
        assert_eq!(order.status, OrderStatus::PaymentFailed);
        assert!(matches!(
            event,
            OrderEvent::PaymentFailed { reason, .. } if reason == "Maximum retry attempts exceeded"
        ));
    }

    #[test]
    fn test_cancel_paths() {
        let mut fresh = order();
        fresh.cancel(Utc::now()).unwrap();
        assert_eq!(fresh.status, OrderStatus::Cancelled);

        let mut failed = pending_order("TX-1");
        failed.fail_payment("declined", "TX-1", Utc::now()).unwrap();
        failed.cancel(Utc::now()).unwrap();
        assert_eq!(failed.status, OrderStatus::Cancelled);

        let mut pending = pending_order("TX-1");
        assert!(pending.cancel(Utc::now()).is_err());
    }

    #[test]
    fn test_request_payment_illegal_from_pending_and_terminal_states() {
        let mut pending = pending_order("TX-1");
        assert!(pending.request_payment("TX-2", Utc::now()).is_err());

        let mut confirmed = pending_order("TX-1");
        confirmed.confirm_payment("P1", "TX-1", Utc::now()).unwrap();
        assert!(confirmed.request_payment("TX-2", Utc::now()).is_err());
        assert!(confirmed.retry_payment("TX-2", Utc::now()).is_err());

        let mut cancelled = order();
        cancelled.cancel(Utc::now()).unwrap();
        assert!(cancelled.request_payment("TX-1", Utc::now()).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrderStatus::Created,
            OrderStatus::PaymentPending,
            OrderStatus::PaymentConfirmed,
            OrderStatus::PaymentFailed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("NOPE"), None);
    }
}
