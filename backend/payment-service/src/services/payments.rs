//! Payment command service.
//!
//! A payment request becomes one Payment record and one staged confirmation,
//! committed together. The gateway is called before the transaction opens;
//! nothing is persisted for an unreachable gateway, so broker redelivery
//! retries the whole attempt. The CVV never leaves the in-memory request.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;

use event_schema::{
    event_type, ConfirmationStatus, EventEnvelope, PaymentConfirmation, PaymentRequest,
};
use transactional_outbox::{OutboxEvent, OutboxRepository, SqlxOutboxRepository};

use crate::db::payment_repo;
use crate::gateway::{ChargeRequest, GatewayError, PaymentGateway};
use crate::models::{Payment, PaymentError, PaymentStatus};

/// Source name stamped into every envelope this service emits.
pub const SOURCE: &str = "payment-service";

/// Aggregate type for outbox rows.
pub const AGGREGATE_TYPE: &str = "payment";

#[derive(Error, Debug)]
pub enum ProcessError {
    /// Retryable: the gateway could not be reached.
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Retryable: infrastructure failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-retryable: staged payload failed to serialize.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Non-retryable: the command is illegal for the aggregate state.
    #[error(transparent)]
    Domain(#[from] PaymentError),
}

impl From<transactional_outbox::OutboxError> for ProcessError {
    fn from(err: transactional_outbox::OutboxError) -> Self {
        match err {
            transactional_outbox::OutboxError::Database(e) => ProcessError::Database(e),
            transactional_outbox::OutboxError::Serialization(e) => ProcessError::Serialization(e),
            other => ProcessError::Database(sqlx::Error::Protocol(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Payment recorded, confirmation staged.
    Completed(PaymentStatus),
    /// A payment with this transaction id already exists; dropped.
    DuplicateDropped,
}

pub struct PaymentService {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(
        pool: PgPool,
        outbox: Arc<SqlxOutboxRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            pool,
            outbox,
            gateway,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, sqlx::Error> {
        payment_repo::find_by_id(&self.pool, payment_id).await
    }

    pub async fn get_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Payment>, sqlx::Error> {
        payment_repo::find_by_transaction(&self.pool, transaction_id).await
    }

    /// Handle one payment request (dispatch steps 3-5): dedup by transaction
    /// id, charge the gateway, persist the payment and stage the
    /// confirmation atomically.
    pub async fn process_request(
        &self,
        request: &PaymentRequest,
    ) -> Result<ProcessOutcome, ProcessError> {
        if payment_repo::find_by_transaction(&self.pool, &request.transaction_id)
            .await?
            .is_some()
        {
            tracing::info!(
                transaction_id = %request.transaction_id,
                order_id = %request.order_id,
                "Duplicate payment request dropped"
            );
            return Ok(ProcessOutcome::DuplicateDropped);
        }

        let now = Utc::now();
        let mut payment = Payment::create(
            &request.transaction_id,
            &request.order_id,
            &request.customer_id,
            request.amount,
            &request.currency,
            request.credit_card.masked_number(),
            now,
        );

        match self
            .gateway
            .charge(&ChargeRequest {
                transaction_id: request.transaction_id.clone(),
                amount: request.amount,
                currency: request.currency.clone(),
                credit_card: request.credit_card.clone(),
            })
            .await
        {
            Ok(approval) => {
                payment.succeed(&format!("approved:{}", approval.reference), Utc::now())?;
            }
            Err(GatewayError::Declined { code, message }) => {
                payment.fail(&message, Some(&code), Utc::now())?;
            }
            Err(GatewayError::Unavailable(message)) => {
                // Nothing persisted; the broker redelivers the request.
                return Err(ProcessError::GatewayUnavailable(message));
            }
        }

        let confirmation = self.confirmation_for(&payment);
        let staged = self.stage_confirmation(&payment, &confirmation)?;

        let mut tx = self.pool.begin().await?;
        if !payment_repo::insert_payment(&mut tx, &payment).await? {
            // A concurrent consumer inserted the same transaction id after
            // the dedup read; its confirmation is already staged.
            return Ok(ProcessOutcome::DuplicateDropped);
        }
        self.outbox.insert(&mut tx, &staged).await?;
        tx.commit().await?;

        tracing::info!(
            payment_id = %payment.payment_id,
            transaction_id = %payment.transaction_id,
            order_id = %payment.order_id,
            status = payment.status.as_str(),
            "Payment processed, confirmation staged"
        );

        Ok(ProcessOutcome::Completed(payment.status))
    }

    /// Refund a successful payment and notify subscribers with a CANCELLED
    /// confirmation.
    pub async fn refund(&self, payment_id: &str) -> Result<Payment, ProcessError> {
        let mut payment = payment_repo::find_by_id(&self.pool, payment_id)
            .await?
            .ok_or_else(|| {
                ProcessError::Database(sqlx::Error::RowNotFound)
            })?;

        payment.refund(Utc::now())?;

        let confirmation = PaymentConfirmation {
            payment_id: Some(payment.payment_id.clone()),
            transaction_id: payment.transaction_id.clone(),
            order_id: payment.order_id.clone(),
            status: ConfirmationStatus::Cancelled,
            amount: Some(payment.amount),
            currency: Some(payment.currency.clone()),
            gateway_response: Some("refunded".to_string()),
            error_message: None,
            processed_at: payment.processed_at.unwrap_or_else(Utc::now),
        };
        let staged = self.stage_confirmation(&payment, &confirmation)?;

        let mut tx = self.pool.begin().await?;
        payment_repo::update_status(&mut tx, &payment).await?;
        self.outbox.insert(&mut tx, &staged).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment.payment_id, "Payment refunded");

        Ok(payment)
    }

    fn confirmation_for(&self, payment: &Payment) -> PaymentConfirmation {
        let status = match payment.status {
            PaymentStatus::Success => ConfirmationStatus::Success,
            PaymentStatus::Failed => ConfirmationStatus::Failed,
            PaymentStatus::Processing => ConfirmationStatus::Pending,
            PaymentStatus::Refunded => ConfirmationStatus::Cancelled,
        };

        PaymentConfirmation {
            payment_id: Some(payment.payment_id.clone()),
            transaction_id: payment.transaction_id.clone(),
            order_id: payment.order_id.clone(),
            status,
            amount: Some(payment.amount),
            currency: Some(payment.currency.clone()),
            gateway_response: payment.gateway_response.clone(),
            error_message: payment.error_message.clone(),
            processed_at: payment.processed_at.unwrap_or(payment.created_at),
        }
    }

    fn stage_confirmation(
        &self,
        payment: &Payment,
        confirmation: &PaymentConfirmation,
    ) -> Result<OutboxEvent, ProcessError> {
        let envelope = EventEnvelope::new(
            event_type::PAYMENT_CONFIRMATION,
            &payment.order_id,
            &payment.transaction_id,
            Some(payment.customer_id.clone()),
            SOURCE,
        );
        Ok(OutboxEvent::stage(
            &envelope,
            AGGREGATE_TYPE,
            &payment.payment_id,
            confirmation,
        )?)
    }
}
