use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

use super::model::{Claim, DeliveryRecord};
use super::Pool;
use crate::model::DeliveryStatus;

const SELECT_COLUMNS: &str = "SELECT page_id, notification_id, status, broadcast_id, attempts, \
     last_error, created_at, updated_at FROM deliveries";

fn row_to_record(row: &SqliteRow) -> Result<DeliveryRecord> {
    let status: String = row.try_get("status")?;
    Ok(DeliveryRecord {
        page_id: row.try_get("page_id")?,
        notification_id: row.try_get("notification_id")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown delivery status {}", status))?,
        broadcast_id: row.try_get("broadcast_id")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

/// How long a `sending` row blocks other deliveries of the same page. A
/// delivery whose worker died is claimable again after this.
pub const SENDING_LEASE_MINUTES: i64 = 15;

/// Atomically start a delivery for `page_id`. A new page, one whose last
/// attempt failed, or one stuck in `sending` past its lease is acquired; a
/// page that is sent or still within its lease is returned as
/// `Claim::Existing`.
#[instrument(skip_all, fields(page_id = %page_id))]
pub async fn claim_delivery(
    pool: &Pool,
    page_id: &str,
    notification_id: Option<&str>,
) -> Result<Claim> {
    let now = Utc::now();
    let lease_expired_before = now - Duration::minutes(SENDING_LEASE_MINUTES);
    let acquired = sqlx::query_as::<_, (i64, Option<i64>)>(
        "INSERT INTO deliveries (page_id, notification_id, status, attempts, created_at, updated_at) \
         VALUES (?, ?, ?, 1, ?, ?) \
         ON CONFLICT(page_id) DO UPDATE SET \
             status = excluded.status, \
             notification_id = excluded.notification_id, \
             attempts = deliveries.attempts + 1, \
             last_error = NULL, \
             updated_at = excluded.updated_at \
         WHERE deliveries.status = ? \
            OR (deliveries.status = ? AND deliveries.updated_at < ?) \
         RETURNING attempts, broadcast_id",
    )
    .bind(page_id)
    .bind(notification_id)
    .bind(DeliveryStatus::Sending.as_str())
    .bind(now)
    .bind(now)
    .bind(DeliveryStatus::Failed.as_str())
    .bind(DeliveryStatus::Sending.as_str())
    .bind(lease_expired_before)
    .fetch_optional(pool)
    .await?;

    if let Some((attempt, draft)) = acquired {
        return Ok(Claim::Acquired {
            attempt,
            draft: draft.map(|id| id as u64),
        });
    }
    let existing = get_delivery(pool, page_id)
        .await?
        .ok_or_else(|| anyhow!("delivery for {} vanished during claim", page_id))?;
    Ok(Claim::Existing(existing))
}

/// Remember the broadcast created for an in-flight delivery.
#[instrument(skip_all, fields(page_id = %page_id, broadcast_id = broadcast_id))]
pub async fn record_broadcast(pool: &Pool, page_id: &str, broadcast_id: u64) -> Result<()> {
    sqlx::query("UPDATE deliveries SET broadcast_id = ?, updated_at = ? WHERE page_id = ?")
        .bind(broadcast_id as i64)
        .bind(Utc::now())
        .bind(page_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all, fields(page_id = %page_id, broadcast_id = broadcast_id))]
pub async fn mark_sent(pool: &Pool, page_id: &str, broadcast_id: u64) -> Result<()> {
    let res = sqlx::query(
        "UPDATE deliveries SET status = ?, broadcast_id = ?, last_error = NULL, updated_at = ? \
         WHERE page_id = ?",
    )
    .bind(DeliveryStatus::Sent.as_str())
    .bind(broadcast_id as i64)
    .bind(Utc::now())
    .bind(page_id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(anyhow!("no delivery row for {}", page_id));
    }
    Ok(())
}

/// Record a failed attempt. A `broadcast_id` stored by `record_broadcast`
/// is left in place so the next claim can send that draft.
#[instrument(skip_all, fields(page_id = %page_id))]
pub async fn mark_failed(pool: &Pool, page_id: &str, error: &str) -> Result<()> {
    sqlx::query("UPDATE deliveries SET status = ?, last_error = ?, updated_at = ? WHERE page_id = ?")
        .bind(DeliveryStatus::Failed.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(page_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_delivery(pool: &Pool, page_id: &str) -> Result<Option<DeliveryRecord>> {
    let row = sqlx::query(&format!("{} WHERE page_id = ?", SELECT_COLUMNS))
        .bind(page_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_record).transpose()
}

/// Most recently updated deliveries first.
#[instrument(skip_all)]
pub async fn list_deliveries(pool: &Pool, limit: i64) -> Result<Vec<DeliveryRecord>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY updated_at DESC, page_id LIMIT ?",
        SELECT_COLUMNS
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_record).collect()
}

/// Drop the record for a page so the next notification sends again.
#[instrument(skip_all)]
pub async fn forget_delivery(pool: &Pool, page_id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM deliveries WHERE page_id = ?")
        .bind(page_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}
