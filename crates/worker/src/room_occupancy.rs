//! Room occupancy sweeps
//!
//! [`run`] reconciles room status for bookings starting today: a room whose
//! booking holds a VERIFIED rent payment becomes OCCUPIED, and a room whose
//! booking still has only PENDING rent is released back to AVAILABLE with
//! that pending rent cancelled (the no-show path). [`release_rooms_past_end`]
//! runs on its own schedule and releases OCCUPIED rooms no longer covered by
//! any ACTIVE booking. These sweeps move rooms and open bills only; booking
//! status never changes here.
//!
//! Each branch re-derives its set from current state, so reruns converge.

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use roomledger_shared::{BookingStatus, Clock, LedgerResult, PaymentKind, PaymentStatus, RoomStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct OccupancySweepReport {
    pub rooms_occupied: u64,
    pub rooms_released: u64,
    pub rent_cancelled: u64,
}

pub async fn run(pool: &PgPool, clock: &Clock) -> LedgerResult<OccupancySweepReport> {
    let today = clock.today();
    let now = clock.now();
    let mut tx = pool.begin().await?;

    let occupied: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE rooms r SET status = $1, updated_at = $2 \
         WHERE r.status = $3 \
           AND EXISTS ( \
               SELECT 1 FROM bookings b \
               JOIN payments p ON p.booking_id = b.id \
               WHERE b.room_id = r.id \
                 AND b.status = $4 \
                 AND b.start_date = $5 \
                 AND p.kind = $6 \
                 AND p.status = $7) \
         RETURNING r.id",
    )
    .bind(RoomStatus::Occupied)
    .bind(now)
    .bind(RoomStatus::Available)
    .bind(BookingStatus::Active)
    .bind(today)
    .bind(PaymentKind::Rent)
    .bind(PaymentStatus::Verified)
    .fetch_all(&mut *tx)
    .await?;

    // No-show: the booking was supposed to start today but its rent never
    // made it past PENDING, so the room goes back on the market and the
    // stale bills are withdrawn.
    let no_shows: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE rooms r SET status = $1, updated_at = $2 \
         FROM bookings b \
         WHERE b.room_id = r.id \
           AND r.status <> $1 \
           AND b.status = $3 \
           AND b.start_date = $4 \
           AND EXISTS ( \
               SELECT 1 FROM payments p \
               WHERE p.booking_id = b.id AND p.kind = $5 AND p.status = $6) \
           AND NOT EXISTS ( \
               SELECT 1 FROM payments p \
               WHERE p.booking_id = b.id AND p.kind = $5 AND p.status = $7) \
         RETURNING b.id",
    )
    .bind(RoomStatus::Available)
    .bind(now)
    .bind(BookingStatus::Active)
    .bind(today)
    .bind(PaymentKind::Rent)
    .bind(PaymentStatus::Pending)
    .bind(PaymentStatus::Verified)
    .fetch_all(&mut *tx)
    .await?;

    let rent_cancelled = if no_shows.is_empty() {
        0
    } else {
        sqlx::query(
            "UPDATE payments SET status = $1, updated_at = $2 \
             WHERE booking_id = ANY($3) AND kind = $4 AND status = $5",
        )
        .bind(PaymentStatus::Cancelled)
        .bind(now)
        .bind(&no_shows)
        .bind(PaymentKind::Rent)
        .bind(PaymentStatus::Pending)
        .execute(&mut *tx)
        .await?
        .rows_affected()
    };

    tx.commit().await?;

    let report = OccupancySweepReport {
        rooms_occupied: occupied.len() as u64,
        rooms_released: no_shows.len() as u64,
        rent_cancelled,
    };
    info!(
        occupied = report.rooms_occupied,
        released = report.rooms_released,
        rent_cancelled = report.rent_cancelled,
        "room occupancy sweep finished"
    );
    Ok(report)
}

/// Releases OCCUPIED rooms that no ACTIVE booking covers today.
pub async fn release_rooms_past_end(pool: &PgPool, clock: &Clock) -> LedgerResult<u64> {
    let today = clock.today();
    let now = clock.now();

    let released: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE rooms r SET status = $1, updated_at = $2 \
         WHERE r.status = $3 \
           AND NOT EXISTS ( \
               SELECT 1 FROM bookings b \
               WHERE b.room_id = r.id \
                 AND b.status = $4 \
                 AND b.start_date <= $5 \
                 AND (b.end_date IS NULL OR b.end_date >= $5)) \
         RETURNING r.id",
    )
    .bind(RoomStatus::Available)
    .bind(now)
    .bind(RoomStatus::Occupied)
    .bind(BookingStatus::Active)
    .bind(today)
    .fetch_all(pool)
    .await?;

    if !released.is_empty() {
        info!(count = released.len(), "rooms released past booking end");
    }
    Ok(released.len() as u64)
}
