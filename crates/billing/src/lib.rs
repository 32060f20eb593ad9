//! RoomLedger Billing Calculator
//!
//! Pure proration and discount arithmetic for room rentals. Everything in
//! this crate is side-effect free; persistence and state transitions live in
//! `roomledger-engine`.

pub mod error;
pub mod period;
pub mod quote;

pub use error::{BillingError, BillingResult};
pub use period::Period;
pub use quote::{quote_for_period, quote_single_month, tier_for_months, PeriodQuote, QuoteLine};
