//! Retry history and attempt rows.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::{RetryAttempt, RetryHistory, RetryStatus};

fn row_to_history(row: &PgRow) -> Result<RetryHistory, sqlx::Error> {
    let status_raw: String = row.try_get("status")?;
    let status = RetryStatus::parse(&status_raw).ok_or_else(|| sqlx::Error::Decode(
        format!("unknown retry status: {status_raw}").into(),
    ))?;

    Ok(RetryHistory {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        original_transaction_id: row.try_get("original_transaction_id")?,
        current_transaction_id: row.try_get("current_transaction_id")?,
        attempt_count: row.try_get("attempt_count")?,
        status,
        first_attempt_at: row.try_get("first_attempt_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
        final_failure_reason: row.try_get("final_failure_reason")?,
        version: row.try_get("version")?,
    })
}

const COLUMNS: &str = r#"
    SELECT id, order_id, original_transaction_id, current_transaction_id,
           attempt_count, status, first_attempt_at, last_attempt_at,
           next_retry_at, final_failure_reason, version
    FROM retry_history
"#;

pub async fn find_by_order(
    pool: &PgPool,
    order_id: &str,
) -> Result<Option<RetryHistory>, sqlx::Error> {
    let row = sqlx::query(&format!("{COLUMNS} WHERE order_id = $1"))
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_history).transpose()
}

pub async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    history: &RetryHistory,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO retry_history (
            id, order_id, original_transaction_id, current_transaction_id,
            attempt_count, status, first_attempt_at, last_attempt_at,
            next_retry_at, final_failure_reason, version
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(history.id)
    .bind(&history.order_id)
    .bind(&history.original_transaction_id)
    .bind(&history.current_transaction_id)
    .bind(history.attempt_count)
    .bind(history.status.as_str())
    .bind(history.first_attempt_at)
    .bind(history.last_attempt_at)
    .bind(history.next_retry_at)
    .bind(&history.final_failure_reason)
    .bind(history.version)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Optimistic update; `false` means a concurrent retry (manual vs scheduled)
/// won the race and this pass must back off.
pub async fn update_history(
    tx: &mut Transaction<'_, Postgres>,
    history: &mut RetryHistory,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE retry_history
        SET current_transaction_id = $1,
            attempt_count = $2,
            status = $3,
            last_attempt_at = $4,
            next_retry_at = $5,
            final_failure_reason = $6,
            version = version + 1
        WHERE id = $7 AND version = $8
        "#,
    )
    .bind(&history.current_transaction_id)
    .bind(history.attempt_count)
    .bind(history.status.as_str())
    .bind(history.last_attempt_at)
    .bind(history.next_retry_at)
    .bind(&history.final_failure_reason)
    .bind(history.id)
    .bind(history.version)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    history.version += 1;
    Ok(true)
}

pub async fn insert_attempt(
    tx: &mut Transaction<'_, Postgres>,
    attempt: &RetryAttempt,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO retry_attempts (id, history_id, transaction_id, attempt_number, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(attempt.id)
    .bind(attempt.history_id)
    .bind(&attempt.transaction_id)
    .bind(attempt.attempt_number)
    .bind(attempt.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn find_attempts(
    pool: &PgPool,
    history_id: Uuid,
) -> Result<Vec<RetryAttempt>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, history_id, transaction_id, attempt_number, created_at
        FROM retry_attempts
        WHERE history_id = $1
        ORDER BY attempt_number ASC
        "#,
    )
    .bind(history_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(RetryAttempt {
                id: row.try_get("id")?,
                history_id: row.try_get("history_id")?,
                transaction_id: row.try_get("transaction_id")?,
                attempt_number: row.try_get("attempt_number")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
