//! Monthly billing sweep
//!
//! Two duties, both driven by the engine clock:
//! - send the renewal notice H-minus days before a booking's end date
//! - issue next month's rent bill for ACTIVE auto-renew bookings that span
//!   into it and are not billed yet
//!
//! One failing booking never stops the sweep; it is logged and skipped.

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use roomledger_billing::{quote_single_month, Period};
use roomledger_engine::Notifier;
use roomledger_shared::{Clock, LedgerResult, PaymentKind, PaymentStatus, CURRENCY, PROVIDER_NAME};

#[derive(Debug, Default, Clone, Copy)]
pub struct BillingSweepReport {
    pub billed: u64,
    pub notified: u64,
    pub skipped: u64,
}

pub async fn run(pool: &PgPool, clock: &Clock, notifier: &Notifier) -> LedgerResult<BillingSweepReport> {
    let today = clock.today();
    let next = Period::from_date(today).next();
    let mut report = BillingSweepReport::default();

    let candidates: Vec<(Uuid, NaiveDate, Option<NaiveDate>, Decimal)> = sqlx::query_as(
        "SELECT id, start_date, end_date, monthly_price \
         FROM bookings WHERE status = 'ACTIVE' AND auto_renew = TRUE \
         ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    for (booking_id, start_date, end_date, monthly_price) in candidates {
        if let Some(end) = end_date {
            if end - Duration::days(clock.renew_h_minus()) == today {
                notifier.send(None, &format!(
                    "Booking {} ends on {}. Reply to renew for {}.",
                    booking_id, end, next
                ));
                report.notified += 1;
            }
        }

        // Only bookings that span into next month are billed for it.
        let covers_next = end_date.map_or(true, |end| end >= next.first_day());
        if !covers_next {
            continue;
        }

        match bill_booking(pool, clock, booking_id, start_date, end_date, monthly_price, next).await
        {
            Ok(true) => report.billed += 1,
            Ok(false) => report.skipped += 1,
            Err(e) => {
                report.skipped += 1;
                warn!(booking_id = %booking_id, error = %e, "monthly billing skipped booking");
            }
        }
    }

    info!(
        billed = report.billed,
        notified = report.notified,
        skipped = report.skipped,
        period = %next,
        "monthly billing sweep finished"
    );
    Ok(report)
}

/// Issues the rent bill for one booking if the period is still unbilled.
/// Returns whether a bill was created.
async fn bill_booking(
    pool: &PgPool,
    clock: &Clock,
    booking_id: Uuid,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    monthly_price: Decimal,
    period: Period,
) -> LedgerResult<bool> {
    let mut tx = pool.begin().await?;

    let already_billed: bool = sqlx::query_scalar(
        "SELECT EXISTS( \
            SELECT 1 FROM payments \
            WHERE booking_id = $1 AND kind = $2 AND period_month = $3)",
    )
    .bind(booking_id)
    .bind(PaymentKind::Rent)
    .bind(period.first_day())
    .fetch_one(&mut *tx)
    .await?;
    if already_billed {
        return Ok(false);
    }

    let amount = quote_single_month(monthly_price, start_date, end_date, period)?;
    if amount <= Decimal::ZERO {
        return Ok(false);
    }

    let now = clock.now();
    sqlx::query(
        "INSERT INTO payments \
           (id, booking_id, kind, status, amount, currency, period_month, provider, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::new_v4())
    .bind(booking_id)
    .bind(PaymentKind::Rent)
    .bind(PaymentStatus::Pending)
    .bind(amount)
    .bind(CURRENCY)
    .bind(period.first_day())
    .bind(PROVIDER_NAME)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(booking_id = %booking_id, %period, %amount, "rent bill issued");
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testsupport::{seed_booking, seed_payment, seed_room, seed_tenant, setup, sweep_clock};
    use roomledger_shared::{BookingStatus, RoomStatus};
    use rust_decimal_macros::dec;

    #[tokio::test]
    #[ignore] // Requires database
    async fn bills_next_month_once_for_auto_renew_bookings() {
        let pool = setup().await;
        let clock = sweep_clock();
        let notifier = Notifier::disabled();
        let tenant = seed_tenant(&pool).await;
        let room = seed_room(&pool, dec!(3_100_000), RoomStatus::Occupied).await;
        let booking = seed_booking(
            &pool,
            tenant,
            room,
            "2025-03-01".parse().unwrap(),
            Some("2025-04-30".parse().unwrap()),
            BookingStatus::Active,
            true,
        )
        .await;
        seed_payment(
            &pool,
            booking,
            PaymentKind::Rent,
            PaymentStatus::Paid,
            dec!(3_100_000),
            Some("2025-03-01".parse().unwrap()),
            clock.now(),
        )
        .await;

        run(&pool, &clock, &notifier).await.unwrap();
        run(&pool, &clock, &notifier).await.unwrap();

        // April is billed exactly once across both passes, at the full
        // monthly price since the booking covers the whole month.
        let april: Vec<(PaymentStatus, Decimal)> = sqlx::query_as(
            "SELECT status, amount FROM payments \
             WHERE booking_id = $1 AND kind = $2 AND period_month = $3",
        )
        .bind(booking)
        .bind(PaymentKind::Rent)
        .bind("2025-04-01".parse::<NaiveDate>().unwrap())
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(april.len(), 1);
        assert_eq!(april[0], (PaymentStatus::Pending, dec!(3_100_000.00)));
    }
}
