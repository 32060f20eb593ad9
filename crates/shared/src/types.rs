//! Domain types shared across RoomLedger
//!
//! Status enums carry explicit transition tables: every guarded state change
//! in the engine goes through [`BookingStatus::can_become`] or
//! [`PaymentStatus::can_become`] instead of scattered conditional checks.
//! Statuses are stored as TEXT in Postgres using their SCREAMING_SNAKE_CASE
//! names.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const PROVIDER_NAME: &str = "XENDIT";
pub const CURRENCY: &str = "IDR";

// =============================================================================
// Status enums
// =============================================================================

/// Room occupancy status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoomStatus::Available => "AVAILABLE",
            RoomStatus::Occupied => "OCCUPIED",
            RoomStatus::Maintenance => "MAINTENANCE",
        };
        write!(f, "{}", s)
    }
}

/// Booking lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Draft,
    Active,
    Ended,
    Cancelled,
}

impl BookingStatus {
    /// Transition table for bookings.
    ///
    /// DRAFT -> ACTIVE (deposit confirmed), DRAFT -> CANCELLED (deposit TTL),
    /// ACTIVE -> ENDED (end date passed or explicit non-renewal). ENDED and
    /// CANCELLED are terminal.
    pub fn can_become(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Draft, BookingStatus::Active)
                | (BookingStatus::Draft, BookingStatus::Cancelled)
                | (BookingStatus::Active, BookingStatus::Ended)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Ended | BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Draft => "DRAFT",
            BookingStatus::Active => "ACTIVE",
            BookingStatus::Ended => "ENDED",
            BookingStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Payment kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    Deposit,
    Rent,
    Full,
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentKind::Deposit => "DEPOSIT",
            PaymentKind::Rent => "RENT",
            PaymentKind::Full => "FULL",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(PaymentKind::Deposit),
            "RENT" => Ok(PaymentKind::Rent),
            "FULL" => Ok(PaymentKind::Full),
            other => Err(format!("unknown payment kind: {}", other)),
        }
    }
}

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    WaitingForPayment,
    Paid,
    Failed,
    Expired,
    Cancelled,
    Verified,
}

impl PaymentStatus {
    /// Transition table for payments.
    ///
    /// PENDING -> WAITING_FOR_PAYMENT -> PAID -> VERIFIED is the happy path;
    /// EXPIRED / FAILED / CANCELLED are the alternate exits from PENDING and
    /// WAITING_FOR_PAYMENT. PENDING -> PAID is permitted for the manual pay
    /// path that skips instrument creation. VERIFIED and CANCELLED are
    /// terminal.
    pub fn can_become(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, WaitingForPayment)
                | (Pending, Paid)
                | (Pending, Expired)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (WaitingForPayment, Paid)
                | (WaitingForPayment, Expired)
                | (WaitingForPayment, Failed)
                | (WaitingForPayment, Cancelled)
                | (Paid, Verified)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Verified | PaymentStatus::Cancelled)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::WaitingForPayment => "WAITING_FOR_PAYMENT",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Verified => "VERIFIED",
        };
        write!(f, "{}", s)
    }
}

/// Gateway flow for a payment instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayFlow {
    Pay,
    ReusablePaymentCode,
}

/// Status of one instrument-creation request against the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Pending,
    WaitingForPayment,
    Paid,
    Failed,
    Expired,
}

// =============================================================================
// Entities
// =============================================================================

/// A rentable room. Occupancy is mutated only by booking creation checks and
/// the occupancy sweeps.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub id: Uuid,
    pub room_no: String,
    pub monthly_price: Decimal,
    pub status: RoomStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// A tenant's reservation of a room for a date span.
///
/// `monthly_price` is snapshotted from the room at creation; later room price
/// changes never reprice an existing booking.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub room_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: BookingStatus,
    pub monthly_price: Decimal,
    pub deposit_amount: Decimal,
    pub auto_renew: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// One bill owed by a booking: the activating deposit or a per-period rent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    /// First day of the billed month; RENT only.
    pub period_month: Option<NaiveDate>,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub paid_at: Option<NaiveDateTime>,
    // Gateway linkage
    pub provider: String,
    pub flow: Option<GatewayFlow>,
    pub channel_code: Option<String>,
    pub reference_id: Option<String>,
    pub pr_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub va_number: Option<String>,
    pub qris_qr_string: Option<String>,
    pub invoice_url: Option<String>,
    pub expires_at: Option<NaiveDateTime>,
    pub actions_json: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// Audit record tying one gateway capture to exactly one payment.
///
/// Exactly one row per payment per reconciliation cycle; more than one match
/// during webhook ingestion is a fatal consistency error.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub provider: String,
    pub provider_payment_id: Option<String>,
    pub payment_request_id: Option<String>,
    pub reference_id: Option<String>,
    pub channel_code: Option<String>,
    /// Whole currency units as reported by the gateway.
    pub amount: i64,
    pub total_amount: Option<i64>,
    pub currency: String,
    pub status: String,
    pub paid_at: Option<NaiveDateTime>,
    pub payload: serde_json::Value,
    pub created_at: NaiveDateTime,
}

/// Append-only log of externally received webhook events, keyed by
/// (provider, event_id). The idempotency ledger for webhook ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookInboxRow {
    pub id: Uuid,
    pub provider: String,
    pub event_id: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub received_at: NaiveDateTime,
}

/// One request made to the gateway to create a payment instrument.
/// Prevents issuing two live instruments for the same booking concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub customer_id: Option<String>,
    pub channel_code: String,
    pub flow: GatewayFlow,
    pub status: AttemptStatus,
    pub request_amount: Option<i64>,
    pub currency: Option<String>,
    pub pr_id: Option<String>,
    pub idem_key: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_transitions_follow_the_table() {
        assert!(BookingStatus::Draft.can_become(BookingStatus::Active));
        assert!(BookingStatus::Draft.can_become(BookingStatus::Cancelled));
        assert!(BookingStatus::Active.can_become(BookingStatus::Ended));

        assert!(!BookingStatus::Active.can_become(BookingStatus::Cancelled));
        assert!(!BookingStatus::Draft.can_become(BookingStatus::Ended));
        assert!(!BookingStatus::Ended.can_become(BookingStatus::Active));
        assert!(!BookingStatus::Cancelled.can_become(BookingStatus::Active));
    }

    #[test]
    fn payment_happy_path_is_permitted() {
        use PaymentStatus::*;
        assert!(Pending.can_become(WaitingForPayment));
        assert!(WaitingForPayment.can_become(Paid));
        assert!(Paid.can_become(Verified));
    }

    #[test]
    fn payment_terminal_states_permit_nothing() {
        use PaymentStatus::*;
        for next in [
            Pending,
            WaitingForPayment,
            Paid,
            Failed,
            Expired,
            Cancelled,
            Verified,
        ] {
            assert!(!Verified.can_become(next));
            assert!(!Cancelled.can_become(next));
        }
    }

    #[test]
    fn verified_is_only_reachable_from_paid() {
        use PaymentStatus::*;
        assert!(Paid.can_become(Verified));
        assert!(!Pending.can_become(Verified));
        assert!(!WaitingForPayment.can_become(Verified));
    }

    #[test]
    fn status_display_matches_storage_names() {
        assert_eq!(
            PaymentStatus::WaitingForPayment.to_string(),
            "WAITING_FOR_PAYMENT"
        );
        assert_eq!(BookingStatus::Cancelled.to_string(), "CANCELLED");
        assert_eq!(RoomStatus::Available.to_string(), "AVAILABLE");
    }

    #[test]
    fn payment_kind_parses_case_insensitively() {
        assert_eq!(" deposit ".parse::<PaymentKind>(), Ok(PaymentKind::Deposit));
        assert_eq!("FULL".parse::<PaymentKind>(), Ok(PaymentKind::Full));
        assert!("BOGUS".parse::<PaymentKind>().is_err());
    }
}
