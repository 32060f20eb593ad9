//! Booking lifecycle
//!
//! Draft creation with its deposit and rent bills, activation on verified
//! payments, and the month-by-month renewal decision. Every mutation runs in
//! a single transaction with the booking row locked first, so concurrent
//! webhooks, sweeps and operator actions serialize per booking.

use chrono::{Months, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use roomledger_billing::{quote_for_period, quote_single_month, Period};
use roomledger_shared::{
    Booking, BookingStatus, Clock, LedgerError, LedgerResult, Payment, PaymentKind, PaymentStatus,
    Room, RoomStatus, CURRENCY, PROVIDER_NAME,
};

use crate::payments::PAYMENT_COLUMNS;

pub(crate) const BOOKING_COLUMNS: &str = "id, tenant_id, room_id, start_date, end_date, status, \
     monthly_price, deposit_amount, auto_renew, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub tenant_id: Uuid,
    pub room_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Defaults to one month of rent when not given.
    pub deposit_amount: Option<Decimal>,
    pub auto_renew: bool,
}

#[derive(Debug, Clone)]
pub struct DraftBooking {
    pub booking_id: Uuid,
    pub deposit_payment_id: Uuid,
    pub rent_payment_id: Uuid,
    pub deposit_amount: Decimal,
    pub rent_amount: Decimal,
}

/// Result of a renewal decision for one billing period.
#[derive(Debug, Clone)]
pub enum RenewalOutcome {
    /// The tenant declined, but the period is already settled; reported as an
    /// outcome rather than an error so callers can show it to the operator.
    DeclineRefused {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// Booking ended at the close of the previous period.
    Declined { end_date: NaiveDate },
    /// A new rent bill was issued and the booking extended.
    Extended {
        payment_id: Uuid,
        amount: Decimal,
        new_end_date: Option<NaiveDate>,
    },
    /// The period already carries a rent bill; nothing was changed.
    AlreadyBilled {
        payment_id: Uuid,
        status: PaymentStatus,
        amount: Decimal,
    },
}

#[derive(Clone)]
pub struct BookingService {
    pool: PgPool,
    clock: Clock,
}

impl BookingService {
    pub fn new(pool: PgPool, clock: Clock) -> Self {
        Self { pool, clock }
    }

    /// Creates a DRAFT booking together with its deposit bill and the rent
    /// bill for the whole requested span, all in one transaction.
    ///
    /// The room's monthly price is snapshotted onto the booking. Overlap with
    /// any non-cancelled booking on the same room rejects the request.
    pub async fn create_draft_booking_with_bills(
        &self,
        req: CreateBookingRequest,
    ) -> LedgerResult<DraftBooking> {
        if req.end_date < req.start_date {
            return Err(LedgerError::InvalidInput(
                "end_date must be on/after start_date".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let room = sqlx::query_as::<_, Room>(
            "SELECT id, room_no, monthly_price, status, created_at, updated_at \
             FROM rooms WHERE id = $1 FOR UPDATE",
        )
        .bind(req.room_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("room {}", req.room_id)))?;

        if room.status == RoomStatus::Maintenance {
            return Err(LedgerError::InvalidTransaction(format!(
                "room {} is under maintenance",
                room.room_no
            )));
        }

        let tenant_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE id = $1)")
                .bind(req.tenant_id)
                .fetch_one(&mut *tx)
                .await?;
        if !tenant_exists {
            return Err(LedgerError::NotFound(format!("tenant {}", req.tenant_id)));
        }

        // Open-ended bookings (NULL end_date) block everything from their
        // start onward.
        let overlaps: bool = sqlx::query_scalar(
            "SELECT EXISTS( \
                SELECT 1 FROM bookings \
                WHERE room_id = $1 \
                  AND status <> $2 \
                  AND start_date <= $3 \
                  AND (end_date IS NULL OR end_date >= $4))",
        )
        .bind(req.room_id)
        .bind(BookingStatus::Cancelled)
        .bind(req.end_date)
        .bind(req.start_date)
        .fetch_one(&mut *tx)
        .await?;
        if overlaps {
            return Err(LedgerError::InvalidTransaction(format!(
                "room {} already booked for an overlapping period",
                room.room_no
            )));
        }

        let deposit_amount = req.deposit_amount.unwrap_or(room.monthly_price);
        if deposit_amount.is_sign_negative() {
            return Err(LedgerError::InvalidInput(
                "deposit_amount must be >= 0".to_string(),
            ));
        }
        let rent_quote = quote_for_period(room.monthly_price, req.start_date, req.end_date)?;

        let now = self.clock.now();
        let booking_id: Uuid = sqlx::query_scalar(
            "INSERT INTO bookings \
               (id, tenant_id, room_id, start_date, end_date, status, \
                monthly_price, deposit_amount, auto_renew, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(req.tenant_id)
        .bind(room.id)
        .bind(req.start_date)
        .bind(req.end_date)
        .bind(BookingStatus::Draft)
        .bind(room.monthly_price)
        .bind(deposit_amount)
        .bind(req.auto_renew)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let deposit_payment_id = insert_payment(
            &mut tx,
            booking_id,
            PaymentKind::Deposit,
            deposit_amount,
            None,
            now,
        )
        .await?;
        let rent_payment_id = insert_payment(
            &mut tx,
            booking_id,
            PaymentKind::Rent,
            rent_quote.total,
            Some(Period::from_date(req.start_date).first_day()),
            now,
        )
        .await?;

        tx.commit().await?;
        info!(
            booking_id = %booking_id,
            room_no = %room.room_no,
            rent = %rent_quote.total,
            deposit = %deposit_amount,
            "created draft booking with deposit and rent bills"
        );

        Ok(DraftBooking {
            booking_id,
            deposit_payment_id,
            rent_payment_id,
            deposit_amount,
            rent_amount: rent_quote.total,
        })
    }

    /// Marks a PAID deposit as VERIFIED and flips its DRAFT booking ACTIVE.
    ///
    /// Verifying an already VERIFIED payment is an accepted no-op, so a
    /// double invocation or a race between two verifiers settles on one
    /// outcome instead of failing the second caller.
    pub async fn activate_on_deposit_verified(&self, payment_id: Uuid) -> LedgerResult<()> {
        self.verify_and_activate(payment_id, PaymentKind::Deposit)
            .await
    }

    /// Marks a PAID rent bill as VERIFIED; activates the booking when it is
    /// still DRAFT (full upfront payments activate through this path).
    /// Re-verification is a no-op, as for deposits.
    pub async fn activate_on_rent_verified(&self, payment_id: Uuid) -> LedgerResult<()> {
        self.verify_and_activate(payment_id, PaymentKind::Rent).await
    }

    async fn verify_and_activate(
        &self,
        payment_id: Uuid,
        expected_kind: PaymentKind,
    ) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payment {}", payment_id)))?;

        if payment.kind != expected_kind {
            return Err(LedgerError::InvalidTransaction(format!(
                "payment {} is {}, expected {}",
                payment.id, payment.kind, expected_kind
            )));
        }
        if payment.status == PaymentStatus::Verified {
            // Re-verification is a no-op.
            return Ok(());
        }
        if !payment.status.can_become(PaymentStatus::Verified) {
            return Err(LedgerError::InvalidTransaction(format!(
                "payment {} cannot move {} -> {}",
                payment.id,
                payment.status,
                PaymentStatus::Verified
            )));
        }

        let now = self.clock.now();
        sqlx::query("UPDATE payments SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(PaymentStatus::Verified)
            .bind(now)
            .bind(payment.id)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        );
        let booking = sqlx::query_as::<_, Booking>(&sql)
            .bind(payment.booking_id)
            .fetch_one(&mut *tx)
            .await?;

        if booking.status != BookingStatus::Active {
            if booking.status.can_become(BookingStatus::Active) {
                sqlx::query("UPDATE bookings SET status = $1, updated_at = $2 WHERE id = $3")
                    .bind(BookingStatus::Active)
                    .bind(now)
                    .bind(booking.id)
                    .execute(&mut *tx)
                    .await?;
                info!(booking_id = %booking.id, payment_id = %payment.id, "booking activated");
            } else {
                debug!(
                    booking_id = %booking.id,
                    status = %booking.status,
                    "verified payment on a booking that cannot activate"
                );
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Settles the tenant's continue/decline decision for one billing period.
    ///
    /// Decline ends the booking at the close of the previous period and drops
    /// any unsettled rent bill for the period; a settled bill refuses the
    /// decline. Continue issues the period's rent bill (priced against the
    /// extended span) and pushes the end date out one month. Re-running either
    /// branch is a no-op.
    pub async fn renewal_decision(
        &self,
        booking_id: Uuid,
        period: Period,
        will_continue: bool,
    ) -> LedgerResult<RenewalOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        );
        let booking = sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("booking {}", booking_id)))?;

        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE booking_id = $1 AND kind = $2 AND period_month = $3 \
             ORDER BY created_at DESC LIMIT 1 FOR UPDATE"
        );
        let existing = sqlx::query_as::<_, Payment>(&sql)
            .bind(booking_id)
            .bind(PaymentKind::Rent)
            .bind(period.first_day())
            .fetch_optional(&mut *tx)
            .await?;

        let now = self.clock.now();

        if !will_continue {
            if let Some(p) = &existing {
                if matches!(p.status, PaymentStatus::Paid | PaymentStatus::Verified) {
                    return Ok(RenewalOutcome::DeclineRefused {
                        payment_id: p.id,
                        status: p.status,
                    });
                }
                // Unsettled bills for the declined period are withdrawn.
                sqlx::query(
                    "DELETE FROM payments WHERE id = $1 AND status IN ('PENDING', 'WAITING_FOR_PAYMENT')",
                )
                .bind(p.id)
                .execute(&mut *tx)
                .await?;
            }

            if booking.status == BookingStatus::Ended {
                return Ok(RenewalOutcome::Declined {
                    end_date: booking.end_date.unwrap_or_else(|| period.prev().last_day()),
                });
            }
            if !booking.status.can_become(BookingStatus::Ended) {
                return Err(LedgerError::InvalidTransaction(format!(
                    "booking {} cannot move {} -> {}",
                    booking.id,
                    booking.status,
                    BookingStatus::Ended
                )));
            }

            let end_date = period.prev().last_day();
            sqlx::query(
                "UPDATE bookings SET status = $1, end_date = $2, auto_renew = FALSE, updated_at = $3 \
                 WHERE id = $4",
            )
            .bind(BookingStatus::Ended)
            .bind(end_date)
            .bind(now)
            .bind(booking.id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            info!(booking_id = %booking.id, %period, %end_date, "renewal declined, booking ended");
            return Ok(RenewalOutcome::Declined { end_date });
        }

        if let Some(p) = existing {
            return Ok(RenewalOutcome::AlreadyBilled {
                payment_id: p.id,
                status: p.status,
                amount: p.amount,
            });
        }

        // Price against the extended span so the renewed month bills in full
        // and the longer tenure counts toward the discount tier.
        let new_end_date = booking.end_date.map(|d| d + Months::new(1));
        let amount =
            quote_single_month(booking.monthly_price, booking.start_date, new_end_date, period)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidTransaction(format!(
                "no billable amount for booking {} in {}",
                booking.id, period
            )));
        }

        let payment_id = insert_payment(
            &mut tx,
            booking.id,
            PaymentKind::Rent,
            amount,
            Some(period.first_day()),
            now,
        )
        .await?;

        if let Some(end) = new_end_date {
            sqlx::query("UPDATE bookings SET end_date = $1, updated_at = $2 WHERE id = $3")
                .bind(end)
                .bind(now)
                .bind(booking.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            booking_id = %booking.id,
            %period,
            %amount,
            "renewal accepted, rent bill issued"
        );
        Ok(RenewalOutcome::Extended {
            payment_id,
            amount,
            new_end_date,
        })
    }
}

pub(crate) async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
    kind: PaymentKind,
    amount: Decimal,
    period_month: Option<NaiveDate>,
    now: NaiveDateTime,
) -> LedgerResult<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO payments \
           (id, booking_id, kind, status, amount, currency, period_month, provider, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING id",
    )
    .bind(Uuid::new_v4())
    .bind(booking_id)
    .bind(kind)
    .bind(PaymentStatus::Pending)
    .bind(amount)
    .bind(CURRENCY)
    .bind(period_month)
    .bind(PROVIDER_NAME)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}
