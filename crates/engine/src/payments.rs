//! Payment settlement and instrument issuance
//!
//! Three entry points:
//! - [`PaymentService::pay`]: manual settlement recorded by an operator,
//!   covering the deposit, the rent, or both
//! - [`PaymentService::inquiry_payment`]: opens the gateway cycle by moving
//!   PENDING bills to WAITING_FOR_PAYMENT and minting their expectation rows
//! - [`PaymentService::start_payment`]: mints an actual payment instrument
//!   against the gateway and stores it on the waiting bills
//!
//! All amounts sent to or compared with the gateway are whole currency units.

use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use roomledger_shared::{
    AttemptStatus, Booking, BookingStatus, Clock, GatewayFlow, LedgerError, LedgerResult, Payment,
    PaymentAttempt, PaymentKind, PaymentStatus, CURRENCY, PROVIDER_NAME,
};

use crate::bookings::BOOKING_COLUMNS;
use crate::gateway::GatewayClient;

pub(crate) const PAYMENT_COLUMNS: &str = "id, booking_id, kind, status, amount, currency, \
     period_month, method, reference, paid_at, provider, flow, channel_code, reference_id, \
     pr_id, provider_payment_id, va_number, qris_qr_string, invoice_url, expires_at, \
     actions_json, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PayRequest {
    /// DEPOSIT settles the deposit, RENT the rent bills, FULL both.
    pub scope: PaymentKind,
    pub method: String,
    pub reference: Option<String>,
    /// Defaults to the engine clock's now.
    pub paid_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayOutcome {
    pub booking_id: Uuid,
    pub scope: PaymentKind,
    pub deposit_updated: u64,
    pub rent_updated: u64,
    pub booking_status: BookingStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct InquiryItem {
    pub payment_id: Uuid,
    pub kind: PaymentKind,
    /// Whole currency units.
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InquiryOutcome {
    pub booking_id: Uuid,
    pub reference_id: String,
    pub total_amount: i64,
    pub currency: String,
    pub items: Vec<InquiryItem>,
}

#[derive(Debug, Clone)]
pub struct StartPaymentRequest {
    pub channel_code: String,
    /// Whole currency units; must equal the waiting total exactly.
    pub amount: i64,
    /// PAY mints a one-shot instrument; REUSABLE_PAYMENT_CODE a top-up code
    /// the tenant can keep paying rent into.
    pub flow: GatewayFlow,
    pub display_name: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartPaymentOutcome {
    pub booking_id: Uuid,
    pub reference_id: String,
    pub payment_request_id: String,
    pub total_amount: i64,
    pub va_number: Option<String>,
    pub qris_qr_string: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub payment_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    clock: Clock,
    gateway: GatewayClient,
}

impl PaymentService {
    pub fn new(pool: PgPool, clock: Clock, gateway: GatewayClient) -> Self {
        Self {
            pool,
            clock,
            gateway,
        }
    }

    /// Records a manual settlement for a booking's open bills.
    ///
    /// Idempotent: only PENDING bills in scope are updated, so replays report
    /// zero rows touched. A settled deposit flips a DRAFT booking ACTIVE.
    pub async fn pay(&self, booking_id: Uuid, req: PayRequest) -> LedgerResult<PayOutcome> {
        if req.method.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "payment method is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        let booking = sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("booking {}", booking_id)))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(LedgerError::InvalidTransaction(format!(
                "booking {} is cancelled",
                booking.id
            )));
        }

        let now = self.clock.now();
        let paid_at = req.paid_at.unwrap_or(now);

        let mut deposit_updated = 0;
        if req.scope != PaymentKind::Rent {
            deposit_updated = self
                .settle_pending(&mut tx, booking.id, PaymentKind::Deposit, &req, paid_at, now)
                .await?;
        }

        let mut rent_updated = 0;
        if req.scope != PaymentKind::Deposit {
            rent_updated = self
                .settle_pending(&mut tx, booking.id, PaymentKind::Rent, &req, paid_at, now)
                .await?;
        }

        // Activation re-checks the deposit from the database so a replay of a
        // FULL payment after the deposit settled still activates.
        let deposit_settled: bool = deposit_updated > 0
            || sqlx::query_scalar(
                "SELECT EXISTS( \
                    SELECT 1 FROM payments \
                    WHERE booking_id = $1 AND kind = $2 AND status IN ('PAID', 'VERIFIED'))",
            )
            .bind(booking.id)
            .bind(PaymentKind::Deposit)
            .fetch_one(&mut *tx)
            .await?;

        let mut booking_status = booking.status;
        if deposit_settled && booking.status != BookingStatus::Active {
            if booking.status.can_become(BookingStatus::Active) {
                sqlx::query("UPDATE bookings SET status = $1, updated_at = $2 WHERE id = $3")
                    .bind(BookingStatus::Active)
                    .bind(now)
                    .bind(booking.id)
                    .execute(&mut *tx)
                    .await?;
                booking_status = BookingStatus::Active;
            } else {
                debug!(
                    booking_id = %booking.id,
                    status = %booking.status,
                    "deposit settled on a booking that cannot activate"
                );
            }
        }

        tx.commit().await?;
        info!(
            booking_id = %booking.id,
            scope = %req.scope,
            deposit_updated,
            rent_updated,
            status = %booking_status,
            "manual payment recorded"
        );

        Ok(PayOutcome {
            booking_id: booking.id,
            scope: req.scope,
            deposit_updated,
            rent_updated,
            booking_status,
        })
    }

    async fn settle_pending(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        booking_id: Uuid,
        kind: PaymentKind,
        req: &PayRequest,
        paid_at: NaiveDateTime,
        now: NaiveDateTime,
    ) -> LedgerResult<u64> {
        let updated = sqlx::query(
            "UPDATE payments \
             SET status = $1, method = $2, reference = $3, paid_at = $4, updated_at = $5 \
             WHERE booking_id = $6 AND kind = $7 AND status = $8",
        )
        .bind(PaymentStatus::Paid)
        .bind(req.method.trim())
        .bind(&req.reference)
        .bind(paid_at)
        .bind(now)
        .bind(booking_id)
        .bind(kind)
        .bind(PaymentStatus::Pending)
        .execute(&mut **tx)
        .await?
        .rows_affected();
        Ok(updated)
    }

    /// Opens the gateway payment cycle for a booking's open bills.
    ///
    /// PENDING bills in scope move to WAITING_FOR_PAYMENT and each gets one
    /// expectation row in `payment_transactions`; webhook ingestion later
    /// requires exactly one such row per bill. The reference_id is derived
    /// from the booking id, so repeated inquiries reuse it.
    pub async fn inquiry_payment(
        &self,
        booking_id: Uuid,
        scope: PaymentKind,
        channel_code: Option<&str>,
    ) -> LedgerResult<InquiryOutcome> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        let booking = sqlx::query_as::<_, Booking>(&sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("booking {}", booking_id)))?;
        if booking.status == BookingStatus::Cancelled {
            return Err(LedgerError::InvalidTransaction(format!(
                "booking {} is cancelled",
                booking.id
            )));
        }

        let kind_filter = kind_filter(scope);
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE booking_id = $1 \
               AND status IN ('PENDING', 'WAITING_FOR_PAYMENT') \
               AND {kind_filter} \
             ORDER BY created_at \
             FOR UPDATE"
        );
        let open: Vec<Payment> = sqlx::query_as(&sql)
            .bind(booking_id)
            .fetch_all(&mut *tx)
            .await?;
        if open.is_empty() {
            return Err(LedgerError::InvalidTransaction(format!(
                "no open {} bill for booking {}",
                scope, booking.id
            )));
        }

        let reference_id = reference_for(booking.id);
        let now = self.clock.now();
        let mut items = Vec::with_capacity(open.len());
        let mut total: i64 = 0;

        for payment in &open {
            let units = to_whole_units(payment.amount)?;
            total += units;
            items.push(InquiryItem {
                payment_id: payment.id,
                kind: payment.kind,
                amount: units,
            });
        }

        for (payment, item) in open.iter().zip(&items) {
            if payment.status == PaymentStatus::Pending {
                sqlx::query(
                    "UPDATE payments \
                     SET status = $1, reference_id = $2, channel_code = COALESCE($3, channel_code), \
                         updated_at = $4 \
                     WHERE id = $5",
                )
                .bind(PaymentStatus::WaitingForPayment)
                .bind(&reference_id)
                .bind(channel_code)
                .bind(now)
                .bind(payment.id)
                .execute(&mut *tx)
                .await?;
            }

            let open_tx_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS( \
                    SELECT 1 FROM payment_transactions \
                    WHERE payment_id = $1 AND status = 'WAITING_FOR_PAYMENT')",
            )
            .bind(payment.id)
            .fetch_one(&mut *tx)
            .await?;

            if !open_tx_exists {
                sqlx::query(
                    "INSERT INTO payment_transactions \
                       (id, payment_id, provider, reference_id, channel_code, amount, \
                        total_amount, currency, status, payload, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'WAITING_FOR_PAYMENT', '{}'::jsonb, $9)",
                )
                .bind(Uuid::new_v4())
                .bind(payment.id)
                .bind(PROVIDER_NAME)
                .bind(&reference_id)
                .bind(channel_code)
                .bind(item.amount)
                .bind(total)
                .bind(CURRENCY)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        info!(
            booking_id = %booking.id,
            scope = %scope,
            total,
            reference_id = %reference_id,
            "payment inquiry opened"
        );

        Ok(InquiryOutcome {
            booking_id: booking.id,
            reference_id,
            total_amount: total,
            currency: CURRENCY.to_string(),
            items,
        })
    }

    /// Mints a payment instrument for everything the booking is waiting on.
    ///
    /// Refused while a previous instrument is still live, and when the caller's
    /// amount does not match the waiting total. The gateway call happens
    /// before the write transaction; a timeout surfaces as a gateway error
    /// with no instrument stored, and the deposit-expiry sweep eventually
    /// reclaims abandoned drafts.
    pub async fn start_payment(
        &self,
        booking_id: Uuid,
        req: StartPaymentRequest,
    ) -> LedgerResult<StartPaymentOutcome> {
        if req.channel_code.trim().is_empty() {
            return Err(LedgerError::InvalidInput(
                "channel_code is required".to_string(),
            ));
        }

        let live_attempt: Option<PaymentAttempt> = sqlx::query_as(
            "SELECT id, booking_id, customer_id, channel_code, flow, status, request_amount, \
                    currency, pr_id, idem_key, created_at, updated_at \
             FROM payment_attempts WHERE booking_id = $1 AND status = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(booking_id)
        .bind(AttemptStatus::WaitingForPayment)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(attempt) = live_attempt {
            return Err(LedgerError::InvalidTransaction(format!(
                "instrument {} is already outstanding for booking {}",
                attempt.pr_id.unwrap_or_else(|| attempt.id.to_string()),
                booking_id
            )));
        }

        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE booking_id = $1 AND status = $2 AND kind IN ('DEPOSIT', 'RENT') \
             ORDER BY created_at"
        );
        let waiting: Vec<Payment> = sqlx::query_as(&sql)
            .bind(booking_id)
            .bind(PaymentStatus::WaitingForPayment)
            .fetch_all(&self.pool)
            .await?;
        if waiting.is_empty() {
            return Err(LedgerError::InvalidTransaction(format!(
                "no bill awaiting an instrument for booking {}; run inquiry first",
                booking_id
            )));
        }

        let mut total: i64 = 0;
        for p in &waiting {
            total += to_whole_units(p.amount)?;
        }
        if req.amount != total {
            return Err(LedgerError::InvalidTransaction(format!(
                "amount mismatch: requested {} but booking {} is waiting on {}",
                req.amount, booking_id, total
            )));
        }

        let reference_id = reference_for(booking_id);
        let idem_key = Uuid::new_v4();
        let resp = match req.flow {
            GatewayFlow::Pay => {
                self.gateway
                    .create_instrument(
                        &reference_id,
                        req.channel_code.trim(),
                        total,
                        req.display_name.as_deref(),
                    )
                    .await?
            }
            GatewayFlow::ReusablePaymentCode => {
                self.gateway
                    .create_reusable_code(
                        &reference_id,
                        req.channel_code.trim(),
                        req.display_name.as_deref(),
                        idem_key,
                    )
                    .await?
            }
        };

        let is_qr = req.channel_code.to_ascii_uppercase().contains("QRIS");
        let action_value = resp.primary_action_value().map(str::to_string);
        let va_number = if is_qr { None } else { action_value.clone() };
        let qris_qr_string = if is_qr { action_value } else { None };
        let expires_at = resp.expires_at();
        let actions_json =
            serde_json::to_value(&resp.actions).unwrap_or(serde_json::Value::Null);

        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let payment_ids: Vec<Uuid> = waiting.iter().map(|p| p.id).collect();

        sqlx::query(
            "UPDATE payments \
             SET flow = $1, channel_code = $2, reference_id = $3, pr_id = $4, \
                 va_number = $5, qris_qr_string = $6, expires_at = $7, actions_json = $8, \
                 updated_at = $9 \
             WHERE id = ANY($10)",
        )
        .bind(req.flow)
        .bind(req.channel_code.trim())
        .bind(&reference_id)
        .bind(&resp.payment_request_id)
        .bind(&va_number)
        .bind(&qris_qr_string)
        .bind(expires_at)
        .bind(&actions_json)
        .bind(now)
        .bind(&payment_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE payment_transactions \
             SET payment_request_id = COALESCE(payment_request_id, $1), \
                 channel_code = COALESCE($2, channel_code) \
             WHERE payment_id = ANY($3) AND status = 'WAITING_FOR_PAYMENT'",
        )
        .bind(&resp.payment_request_id)
        .bind(req.channel_code.trim())
        .bind(&payment_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO payment_attempts \
               (id, booking_id, customer_id, channel_code, flow, status, request_amount, \
                currency, pr_id, idem_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .bind(&req.customer_id)
        .bind(req.channel_code.trim())
        .bind(req.flow)
        .bind(AttemptStatus::WaitingForPayment)
        .bind(total)
        .bind(CURRENCY)
        .bind(&resp.payment_request_id)
        .bind(idem_key)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            booking_id = %booking_id,
            pr_id = %resp.payment_request_id,
            channel = %req.channel_code,
            total,
            "payment instrument issued"
        );

        Ok(StartPaymentOutcome {
            booking_id,
            reference_id,
            payment_request_id: resp.payment_request_id,
            total_amount: total,
            va_number,
            qris_qr_string,
            expires_at,
            payment_ids,
        })
    }
}

fn kind_filter(scope: PaymentKind) -> &'static str {
    match scope {
        PaymentKind::Deposit => "kind = 'DEPOSIT'",
        PaymentKind::Rent => "kind = 'RENT'",
        PaymentKind::Full => "kind IN ('DEPOSIT', 'RENT')",
    }
}

/// Gateway reference for a booking: the booking id in simple uppercase form,
/// stable across inquiries and parseable back to the booking.
pub(crate) fn reference_for(booking_id: Uuid) -> String {
    booking_id.simple().to_string().to_uppercase()
}

/// Converts a money amount to whole currency units for the gateway.
pub(crate) fn to_whole_units(amount: Decimal) -> LedgerResult<i64> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            LedgerError::Consistency(format!(
                "amount {} not representable in whole currency units",
                amount
            ))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn whole_units_round_half_up() {
        assert_eq!(to_whole_units(dec!(3_100_000.00)).unwrap(), 3_100_000);
        assert_eq!(to_whole_units(dec!(99.50)).unwrap(), 100);
        assert_eq!(to_whole_units(dec!(99.49)).unwrap(), 99);
    }

    #[test]
    fn reference_round_trips_to_the_booking_id() {
        let id = Uuid::new_v4();
        let reference = reference_for(id);
        assert_eq!(reference.len(), 32);
        assert_eq!(Uuid::parse_str(&reference).unwrap(), id);
    }

    #[test]
    fn kind_filter_covers_each_scope() {
        assert_eq!(kind_filter(PaymentKind::Deposit), "kind = 'DEPOSIT'");
        assert_eq!(kind_filter(PaymentKind::Rent), "kind = 'RENT'");
        assert_eq!(kind_filter(PaymentKind::Full), "kind IN ('DEPOSIT', 'RENT')");
    }
}
