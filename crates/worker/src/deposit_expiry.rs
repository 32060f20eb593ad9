//! Deposit expiry sweep
//!
//! DRAFT bookings hold their room only as long as the deposit settles within
//! the configured TTL. Past the cutoff the booking is cancelled and its open
//! bills withdrawn, releasing the room for the overlap check. Re-running the
//! sweep finds nothing left to cancel.

use chrono::Duration;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use roomledger_shared::{BookingStatus, Clock, LedgerResult, PaymentStatus};

/// Cancels expired drafts; returns how many bookings were reclaimed.
pub async fn run(pool: &PgPool, clock: &Clock, ttl_minutes: i64) -> LedgerResult<u64> {
    let now = clock.now();
    let cutoff = now - Duration::minutes(ttl_minutes);

    let mut tx = pool.begin().await?;

    let expired: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE bookings b \
         SET status = $1, auto_renew = FALSE, updated_at = $2 \
         WHERE b.status = $3 \
           AND EXISTS ( \
               SELECT 1 FROM payments p \
               WHERE p.booking_id = b.id \
                 AND p.kind = 'DEPOSIT' \
                 AND p.status IN ('PENDING', 'WAITING_FOR_PAYMENT') \
                 AND p.created_at < $4) \
         RETURNING b.id",
    )
    .bind(BookingStatus::Cancelled)
    .bind(now)
    .bind(BookingStatus::Draft)
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await?;

    if !expired.is_empty() {
        sqlx::query(
            "UPDATE payments SET status = $1, updated_at = $2 \
             WHERE booking_id = ANY($3) AND status IN ('PENDING', 'WAITING_FOR_PAYMENT')",
        )
        .bind(PaymentStatus::Cancelled)
        .bind(now)
        .bind(&expired)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if !expired.is_empty() {
        info!(count = expired.len(), "expired draft bookings cancelled");
    }
    Ok(expired.len() as u64)
}
