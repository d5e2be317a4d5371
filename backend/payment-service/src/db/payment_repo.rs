//! Payment record access.
//!
//! `transaction_id` carries a unique index; `insert_payment` reports a
//! conflict instead of erroring so the consumer can drop a concurrent
//! duplicate request quietly.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{Payment, PaymentStatus};

fn row_to_payment(row: &PgRow) -> Result<Payment, sqlx::Error> {
    let status_raw: String = row.try_get("status")?;
    let status = PaymentStatus::parse(&status_raw).ok_or_else(|| sqlx::Error::Decode(
        format!("unknown payment status: {status_raw}").into(),
    ))?;

    Ok(Payment {
        payment_id: row.try_get("payment_id")?,
        transaction_id: row.try_get("transaction_id")?,
        order_id: row.try_get("order_id")?,
        customer_id: row.try_get("customer_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        masked_card_number: row.try_get("masked_card_number")?,
        status,
        gateway_response: row.try_get("gateway_response")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

const COLUMNS: &str = r#"
    SELECT payment_id, transaction_id, order_id, customer_id, amount, currency,
           masked_card_number, status, gateway_response, error_message,
           created_at, processed_at
    FROM payment_records
"#;

/// Insert a payment. Returns `false` when a record with the same
/// `transaction_id` already exists.
pub async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO payment_records (
            payment_id, transaction_id, order_id, customer_id, amount, currency,
            masked_card_number, status, gateway_response, error_message,
            created_at, processed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (transaction_id) DO NOTHING
        "#,
    )
    .bind(&payment.payment_id)
    .bind(&payment.transaction_id)
    .bind(&payment.order_id)
    .bind(&payment.customer_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(&payment.masked_card_number)
    .bind(payment.status.as_str())
    .bind(&payment.gateway_response)
    .bind(&payment.error_message)
    .bind(payment.created_at)
    .bind(payment.processed_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_by_id(pool: &PgPool, payment_id: &str) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query(&format!("{COLUMNS} WHERE payment_id = $1"))
        .bind(payment_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_payment).transpose()
}

pub async fn find_by_transaction(
    pool: &PgPool,
    transaction_id: &str,
) -> Result<Option<Payment>, sqlx::Error> {
    let row = sqlx::query(&format!("{COLUMNS} WHERE transaction_id = $1"))
        .bind(transaction_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_payment).transpose()
}

pub async fn update_status(
    tx: &mut Transaction<'_, Postgres>,
    payment: &Payment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE payment_records
        SET status = $1,
            gateway_response = $2,
            error_message = $3,
            processed_at = $4
        WHERE payment_id = $5
        "#,
    )
    .bind(payment.status.as_str())
    .bind(&payment.gateway_response)
    .bind(&payment.error_message)
    .bind(payment.processed_at)
    .bind(&payment.payment_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
