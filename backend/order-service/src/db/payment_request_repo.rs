//! Audit trail of issued payment requests.
//!
//! Every `PaymentRequested` event inserts one row in the same transaction.
//! The scheduler reads the latest row to rebuild the request body when it
//! issues a retry under a new transaction id.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PaymentRequestRecord {
    pub id: Uuid,
    pub order_id: String,
    pub transaction_id: String,
    pub customer_id: String,
    pub amount: Decimal,
    pub currency: String,
    /// Card data as transmitted; the wire contract needs it again on retry.
    pub card: serde_json::Value,
    pub merchant_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn row_to_record(row: &PgRow) -> Result<PaymentRequestRecord, sqlx::Error> {
    Ok(PaymentRequestRecord {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        transaction_id: row.try_get("transaction_id")?,
        customer_id: row.try_get("customer_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        card: row.try_get("card")?,
        merchant_id: row.try_get("merchant_id")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    record: &PaymentRequestRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_requests (
            id, order_id, transaction_id, customer_id, amount, currency,
            card, merchant_id, description, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(record.id)
    .bind(&record.order_id)
    .bind(&record.transaction_id)
    .bind(&record.customer_id)
    .bind(record.amount)
    .bind(&record.currency)
    .bind(&record.card)
    .bind(&record.merchant_id)
    .bind(&record.description)
    .bind(record.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn find_latest_by_order(
    pool: &PgPool,
    order_id: &str,
) -> Result<Option<PaymentRequestRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, order_id, transaction_id, customer_id, amount, currency,
               card, merchant_id, description, created_at
        FROM payment_requests
        WHERE order_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}
