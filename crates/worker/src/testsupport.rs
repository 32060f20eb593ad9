//! Seed helpers for the sweep tests.
//!
//! The sweeps read whatever the lifecycle services would have written, so
//! tests insert rows directly instead of driving the engine. All DB tests
//! are ignored by default; run them with a disposable database:
//!   DATABASE_URL=postgres://localhost/roomledger_test cargo test -- --ignored

use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use roomledger_shared::{
    db, BookingStatus, Clock, PaymentKind, PaymentStatus, RoomStatus, CURRENCY, PROVIDER_NAME,
};

pub fn sweep_clock() -> Clock {
    let offset = FixedOffset::east_opt(7 * 3600).unwrap();
    Clock::manual("2025-03-10T08:00:00".parse().unwrap(), offset)
}

pub async fn setup() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = db::create_pool(&url).await.expect("pool");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn seed_tenant(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO tenants (id, full_name) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("Tenant {}", id.simple()))
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_room(pool: &PgPool, price: Decimal, status: RoomStatus) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO rooms (id, room_no, monthly_price, status) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(format!("R-{}", id.simple()))
        .bind(price)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
    id
}

#[allow(clippy::too_many_arguments)]
pub async fn seed_booking(
    pool: &PgPool,
    tenant_id: Uuid,
    room_id: Uuid,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    status: BookingStatus,
    auto_renew: bool,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO bookings \
           (id, tenant_id, room_id, start_date, end_date, status, monthly_price, \
            deposit_amount, auto_renew) \
         SELECT $1, $2, $3, $4, $5, $6, r.monthly_price, r.monthly_price, $7 \
         FROM rooms r WHERE r.id = $3",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(room_id)
    .bind(start_date)
    .bind(end_date)
    .bind(status)
    .bind(auto_renew)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[allow(clippy::too_many_arguments)]
pub async fn seed_payment(
    pool: &PgPool,
    booking_id: Uuid,
    kind: PaymentKind,
    status: PaymentStatus,
    amount: Decimal,
    period_month: Option<NaiveDate>,
    created_at: NaiveDateTime,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO payments \
           (id, booking_id, kind, status, amount, currency, period_month, provider, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(id)
    .bind(booking_id)
    .bind(kind)
    .bind(status)
    .bind(amount)
    .bind(CURRENCY)
    .bind(period_month)
    .bind(PROVIDER_NAME)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn room_status(pool: &PgPool, id: Uuid) -> RoomStatus {
    sqlx::query_scalar("SELECT status FROM rooms WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn room_updated_at(pool: &PgPool, id: Uuid) -> Option<NaiveDateTime> {
    sqlx::query_scalar("SELECT updated_at FROM rooms WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn booking_status(pool: &PgPool, id: Uuid) -> BookingStatus {
    sqlx::query_scalar("SELECT status FROM bookings WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn booking_auto_renew(pool: &PgPool, id: Uuid) -> bool {
    sqlx::query_scalar("SELECT auto_renew FROM bookings WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn payment_status(pool: &PgPool, id: Uuid) -> PaymentStatus {
    sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}
