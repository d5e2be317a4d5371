//! Order row access.
//!
//! Updates go through the optimistic `version` column; a concurrent
//! transition makes `update_order` report no rows, which consumers surface
//! as a retryable conflict.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::{Order, OrderStatus};

fn row_to_order(row: &PgRow) -> Result<Order, sqlx::Error> {
    let status_raw: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status_raw).ok_or_else(|| sqlx::Error::Decode(
        format!("unknown order status: {status_raw}").into(),
    ))?;

    Ok(Order {
        order_id: row.try_get("order_id")?,
        customer_id: row.try_get("customer_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status,
        transaction_id: row.try_get("transaction_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        version: row.try_get("version")?,
    })
}

const COLUMNS: &str = r#"
    SELECT order_id, customer_id, amount, currency, status, transaction_id,
           created_at, updated_at, version
    FROM orders
"#;

pub async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            order_id, customer_id, amount, currency, status, transaction_id,
            created_at, updated_at, version
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&order.order_id)
    .bind(&order.customer_id)
    .bind(order.amount)
    .bind(&order.currency)
    .bind(order.status.as_str())
    .bind(&order.transaction_id)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.version)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn find_order(pool: &PgPool, order_id: &str) -> Result<Option<Order>, sqlx::Error> {
    let row = sqlx::query(&format!("{COLUMNS} WHERE order_id = $1"))
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_order).transpose()
}

/// Persist a transition under the aggregate's optimistic lock. Returns
/// `false` when another writer got there first; the in-memory order's
/// version is bumped on success.
pub async fn update_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &mut Order,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET status = $1,
            transaction_id = $2,
            updated_at = $3,
            version = version + 1
        WHERE order_id = $4 AND version = $5
        "#,
    )
    .bind(order.status.as_str())
    .bind(&order.transaction_id)
    .bind(order.updated_at)
    .bind(&order.order_id)
    .bind(order.version)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    order.version += 1;
    Ok(true)
}

/// Orders whose latest attempt failed, oldest first.
pub async fn find_failed_orders(pool: &PgPool, limit: i64) -> Result<Vec<Order>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "{COLUMNS} WHERE status = 'PAYMENT_FAILED' ORDER BY updated_at ASC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_order).collect()
}

/// PAYMENT_PENDING orders not touched since `cutoff`, treated as timed out.
pub async fn find_timed_out_orders(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Order>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "{COLUMNS} WHERE status = 'PAYMENT_PENDING' AND updated_at < $1
         ORDER BY updated_at ASC LIMIT $2"
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_order).collect()
}
