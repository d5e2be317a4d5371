//! Order command service: every state change is one database transaction
//! carrying the aggregate write, any audit rows, and the staged outbox event.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use event_schema::{
    event_type, ConfirmationStatus, CreditCard, EventEnvelope, PaymentConfirmation,
    PaymentRequest,
};
use transactional_outbox::{OutboxEvent, OutboxRepository, SqlxOutboxRepository};

use crate::db::{order_repo, payment_request_repo, retry_repo, PaymentRequestRecord};
use crate::models::{Order, OrderError, OrderEvent, OrderStatus};

/// Source name stamped into every envelope this service emits.
pub const SOURCE: &str = "order-service";

/// Aggregate type for outbox rows.
pub const AGGREGATE_TYPE: &str = "order";

/// Errors from applying an inbound confirmation, classified by the consumer
/// dispatcher.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Non-retryable: the referenced order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Non-retryable: the command is illegal in the order's current state.
    #[error(transparent)]
    Domain(#[from] OrderError),

    /// Retryable: lost an optimistic-lock race; broker redelivery retries.
    #[error("Concurrent modification of order {0}")]
    Conflict(String),

    /// Retryable: infrastructure failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-retryable: a staged payload failed to serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<transactional_outbox::OutboxError> for ApplyError {
    fn from(err: transactional_outbox::OutboxError) -> Self {
        match err {
            transactional_outbox::OutboxError::Database(e) => ApplyError::Database(e),
            transactional_outbox::OutboxError::Serialization(e) => ApplyError::Serialization(e),
            other => ApplyError::Database(sqlx::Error::Protocol(other.to_string())),
        }
    }
}

/// How an inbound confirmation was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// A state transition was committed.
    Applied(OrderStatus),
    /// Same outcome already applied for this transaction id; dropped.
    DuplicateDropped,
    /// Transaction id belongs to a superseded attempt; dropped.
    StaleDropped,
    /// PENDING/CANCELLED confirmations have no order transition; dropped.
    Ignored,
}

pub struct NewOrder {
    pub customer_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub credit_card: CreditCard,
    pub billing_address: Option<String>,
    pub description: Option<String>,
}

pub struct OrderService {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
    merchant_id: String,
}

impl OrderService {
    pub fn new(pool: PgPool, outbox: Arc<SqlxOutboxRepository>, merchant_id: String) -> Self {
        Self {
            pool,
            outbox,
            merchant_id,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn outbox(&self) -> &Arc<SqlxOutboxRepository> {
        &self.outbox
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>, sqlx::Error> {
        order_repo::find_order(&self.pool, order_id).await
    }

    /// Create an order and immediately request its first payment attempt.
    /// Order row, audit row, and staged `PaymentRequested` commit together.
    pub async fn create_order(&self, new_order: NewOrder) -> Result<Order, ApplyError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4().to_string();
        let transaction_id = Uuid::new_v4().to_string();

        let mut order = Order::create(
            &order_id,
            &new_order.customer_id,
            new_order.amount,
            &new_order.currency,
            now,
        );
        // Infallible from CREATED.
        order.request_payment(&transaction_id, now)?;

        let request = PaymentRequest {
            transaction_id: transaction_id.clone(),
            order_id: order_id.clone(),
            customer_id: new_order.customer_id.clone(),
            amount: new_order.amount,
            currency: new_order.currency.clone(),
            credit_card: new_order.credit_card.clone(),
            billing_address: new_order.billing_address.clone(),
            merchant_id: self.merchant_id.clone(),
            description: new_order.description.clone(),
            timestamp: now,
        };

        let envelope = EventEnvelope::new(
            event_type::PAYMENT_REQUESTED,
            &order_id,
            &transaction_id,
            Some(new_order.customer_id.clone()),
            SOURCE,
        );
        let staged = OutboxEvent::stage(&envelope, AGGREGATE_TYPE, &order_id, &request)?;

        let audit = PaymentRequestRecord {
            id: Uuid::new_v4(),
            order_id: order_id.clone(),
            transaction_id: transaction_id.clone(),
            customer_id: new_order.customer_id,
            amount: new_order.amount,
            currency: new_order.currency,
            card: serde_json::to_value(&new_order.credit_card)?,
            merchant_id: self.merchant_id.clone(),
            description: new_order.description,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;
        order_repo::insert_order(&mut tx, &order).await?;
        payment_request_repo::insert(&mut tx, &audit).await?;
        self.outbox.insert(&mut tx, &staged).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.order_id,
            transaction_id = %transaction_id,
            "Order created, payment requested"
        );

        Ok(order)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<Order, ApplyError> {
        let mut order = order_repo::find_order(&self.pool, order_id)
            .await?
            .ok_or_else(|| ApplyError::OrderNotFound(order_id.to_string()))?;

        order.cancel(Utc::now())?;

        let mut tx = self.pool.begin().await?;
        if !order_repo::update_order(&mut tx, &mut order).await? {
            return Err(ApplyError::Conflict(order_id.to_string()));
        }
        tx.commit().await?;

        tracing::info!(order_id = %order_id, "Order cancelled");

        Ok(order)
    }

    /// Apply an inbound payment confirmation (§dispatch steps 3-5):
    /// deduplicate by transaction id, route by status, persist the transition
    /// and the emitted event atomically.
    pub async fn apply_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ApplyError> {
        let mut order = order_repo::find_order(&self.pool, &confirmation.order_id)
            .await?
            .ok_or_else(|| ApplyError::OrderNotFound(confirmation.order_id.clone()))?;

        let current_tx = order.transaction_id.clone().unwrap_or_default();
        if current_tx != confirmation.transaction_id {
            tracing::warn!(
                order_id = %order.order_id,
                current_transaction_id = %current_tx,
                inbound_transaction_id = %confirmation.transaction_id,
                "Dropping confirmation for superseded payment attempt"
            );
            return Ok(ConfirmationOutcome::StaleDropped);
        }

        // Redelivery of an outcome that already landed is a no-op.
        let already_applied = matches!(
            (confirmation.status, order.status),
            (ConfirmationStatus::Success, OrderStatus::PaymentConfirmed)
                | (ConfirmationStatus::Failed, OrderStatus::PaymentFailed)
        );
        if already_applied {
            tracing::info!(
                order_id = %order.order_id,
                transaction_id = %confirmation.transaction_id,
                status = %confirmation.status,
                "Dropping duplicate confirmation"
            );
            return Ok(ConfirmationOutcome::DuplicateDropped);
        }

        let now = Utc::now();
        let event = match confirmation.status {
            ConfirmationStatus::Success => {
                let payment_id = confirmation.payment_id.as_deref().unwrap_or_default();
                match order.confirm_payment(payment_id, &confirmation.transaction_id, now) {
                    Ok(event) => event,
                    Err(OrderError::TransactionMismatch { .. }) => {
                        return Ok(ConfirmationOutcome::StaleDropped)
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            ConfirmationStatus::Failed => {
                let reason = confirmation.error_message.as_deref().unwrap_or_default();
                match order.fail_payment(reason, &confirmation.transaction_id, now) {
                    Ok(event) => event,
                    Err(OrderError::TransactionMismatch { .. }) => {
                        return Ok(ConfirmationOutcome::StaleDropped)
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            ConfirmationStatus::Pending | ConfirmationStatus::Cancelled => {
                tracing::info!(
                    order_id = %order.order_id,
                    status = %confirmation.status,
                    "Confirmation status has no order transition; dropping"
                );
                return Ok(ConfirmationOutcome::Ignored);
            }
        };

        let staged = self.stage_order_event(&order, &event)?;

        // A successful confirmation also closes any open retry history.
        let mut history = if confirmation.status == ConfirmationStatus::Success {
            retry_repo::find_by_order(&self.pool, &order.order_id)
                .await?
                .filter(|h| !h.status.is_terminal())
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;
        if !order_repo::update_order(&mut tx, &mut order).await? {
            return Err(ApplyError::Conflict(order.order_id.clone()));
        }
        if let Some(history) = history.as_mut() {
            history.mark_successful();
            if !retry_repo::update_history(&mut tx, history).await? {
                return Err(ApplyError::Conflict(order.order_id.clone()));
            }
        }
        self.outbox.insert(&mut tx, &staged).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.order_id,
            transaction_id = %confirmation.transaction_id,
            status = order.status.as_str(),
            "Confirmation applied"
        );

        Ok(ConfirmationOutcome::Applied(order.status))
    }

    /// Stage an order lifecycle event for the outbox.
    pub fn stage_order_event(
        &self,
        order: &Order,
        event: &OrderEvent,
    ) -> Result<OutboxEvent, ApplyError> {
        let (event_type_name, transaction_id, payload) = match event {
            OrderEvent::PaymentRequested {
                order_id,
                transaction_id,
                customer_id,
            } => (
                event_type::PAYMENT_REQUESTED,
                transaction_id.clone(),
                serde_json::json!({
                    "orderId": order_id,
                    "transactionId": transaction_id,
                    "customerId": customer_id,
                }),
            ),
            OrderEvent::PaymentConfirmed {
                order_id,
                transaction_id,
                payment_id,
            } => (
                event_type::PAYMENT_CONFIRMED,
                transaction_id.clone(),
                serde_json::json!({
                    "orderId": order_id,
                    "transactionId": transaction_id,
                    "paymentId": payment_id,
                }),
            ),
            OrderEvent::PaymentFailed {
                order_id,
                transaction_id,
                reason,
            } => (
                event_type::PAYMENT_FAILED,
                transaction_id.clone(),
                serde_json::json!({
                    "orderId": order_id,
                    "transactionId": transaction_id,
                    "reason": reason,
                }),
            ),
        };

        let envelope = EventEnvelope::new(
            event_type_name,
            &order.order_id,
            &transaction_id,
            Some(order.customer_id.clone()),
            SOURCE,
        );
        Ok(OutboxEvent::stage(
            &envelope,
            AGGREGATE_TYPE,
            &order.order_id,
            &payload,
        )?)
    }
}
