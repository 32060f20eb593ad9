//! Proration and discount calculator
//!
//! Pure functions: no I/O, no database, no clock. The lifecycle services and
//! the monthly-billing sweep call in here whenever a bill must be priced.
//!
//! Pricing policy:
//! - [`quote_for_period`] bills every fully covered calendar month at the
//!   monthly price and prorates partial months at `monthly_price / 31` per
//!   day, regardless of the month's true length.
//! - [`quote_single_month`] prorates against the month's actual day count.
//!
//! The two entry points therefore disagree on partial-month proration; this
//! mirrors the billing rules this engine was commissioned to implement and is
//! deliberately not unified. See DESIGN.md.

use chrono::{Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::period::Period;

/// Fixed per-day divisor for partial months in [`quote_for_period`].
const FIXED_MONTH_DIVISOR: u32 = 31;

/// Scale used for intermediate daily rates.
const SCALE_DAILY: u32 = 6;

/// Currency scale (cents).
const SCALE_MONEY: u32 = 2;

/// Discount tiers: (minimum whole months, rate). The active tier is the
/// highest threshold not exceeding the whole-month count.
const DISCOUNT_TIERS: [(u32, Decimal); 3] = [
    (3, dec!(0.05)),
    (6, dec!(0.06)),
    (12, dec!(0.08)),
];

/// One calendar-month line of a period quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteLine {
    pub period: Period,
    pub billable_days: i64,
    /// Daily rate used when the line is a partial month (scale 4).
    pub daily_rate: Decimal,
    pub amount: Decimal,
}

/// A multi-month quote with a single discount over the whole span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodQuote {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_price: Decimal,
    pub whole_months: u32,
    pub discount_rate: Decimal,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub lines: Vec<QuoteLine>,
}

/// Quote `[start, end]` (inclusive), prorating per calendar month and
/// applying one discount chosen by the count of whole months in the span.
pub fn quote_for_period(
    monthly_price: Decimal,
    start: NaiveDate,
    end: NaiveDate,
) -> BillingResult<PeriodQuote> {
    if monthly_price.is_sign_negative() {
        return Err(BillingError::NegativePrice);
    }
    if end < start {
        return Err(BillingError::EndBeforeStart);
    }

    let daily = daily_rate(monthly_price, FIXED_MONTH_DIVISOR);

    let mut lines = Vec::new();
    let mut subtotal = Decimal::ZERO;
    let mut cursor = Period::from_date(start);
    let last = Period::from_date(end);

    while cursor <= last {
        let month_start = cursor.first_day();
        let month_end = cursor.last_day();

        let overlap_start = start.max(month_start);
        let overlap_end = end.min(month_end);

        if overlap_end >= overlap_start {
            let billable_days = (overlap_end - overlap_start).num_days() + 1;
            let amount = if overlap_start == month_start && overlap_end == month_end {
                // A fully covered month bills the monthly price outright.
                money(monthly_price)
            } else {
                money(daily * Decimal::from(billable_days))
            };

            lines.push(QuoteLine {
                period: cursor,
                billable_days,
                daily_rate: daily.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero),
                amount,
            });
            subtotal += amount;
        }

        cursor = cursor.next();
    }

    let whole_months = count_whole_months(start, end);
    let discount_rate = tier_for_months(whole_months);
    let discount_amount = money(subtotal * discount_rate);
    let total = money(subtotal - discount_amount);

    Ok(PeriodQuote {
        start_date: start,
        end_date: end,
        monthly_price,
        whole_months,
        discount_rate,
        subtotal,
        discount_amount,
        total,
        lines,
    })
}

/// Quote a single calendar month, clipped to the booking's span.
///
/// Returns zero when the booking and the month do not overlap. The discount
/// tier is chosen from the whole months between the booking start and the
/// effective end (booking end if set, else the month's last day).
pub fn quote_single_month(
    monthly_price: Decimal,
    booking_start: NaiveDate,
    booking_end: Option<NaiveDate>,
    period: Period,
) -> BillingResult<Decimal> {
    if monthly_price.is_sign_negative() {
        return Err(BillingError::NegativePrice);
    }

    let month_start = period.first_day();
    let month_end = period.last_day();
    let effective_end = booking_end.unwrap_or(month_end);

    if effective_end < month_start || booking_start > month_end {
        return Ok(Decimal::ZERO);
    }

    let start = booking_start.max(month_start);
    let end = effective_end.min(month_end);
    let billable_days = (end - start).num_days() + 1;
    if billable_days <= 0 {
        return Ok(Decimal::ZERO);
    }

    let daily = daily_rate(monthly_price, period.days_in_month());
    let prorated = daily * Decimal::from(billable_days);

    let tier_end = booking_end.unwrap_or(month_end);
    let whole = count_whole_months(booking_start, tier_end);
    let discount = tier_for_months(whole);

    Ok(money(prorated * (Decimal::ONE - discount)))
}

/// Look up the applicable discount for a given number of whole months.
pub fn tier_for_months(whole_months: u32) -> Decimal {
    DISCOUNT_TIERS
        .iter()
        .rev()
        .find(|(min, _)| whole_months >= *min)
        .map(|(_, rate)| *rate)
        .unwrap_or(Decimal::ZERO)
}

/// Counts whole months such that `start + N months <= end` (inclusive
/// boundary semantics, stepping month by month so clamped month-ends
/// accumulate the same way repeated `plusMonths(1)` would).
pub fn count_whole_months(start: NaiveDate, end: NaiveDate) -> u32 {
    let mut months = 0;
    let mut cur = start;
    while cur + Months::new(1) <= end {
        months += 1;
        cur = cur + Months::new(1);
    }
    months
}

fn daily_rate(monthly_price: Decimal, days_in_month: u32) -> Decimal {
    (monthly_price / Decimal::from(days_in_month))
        .round_dp_with_strategy(SCALE_DAILY, RoundingStrategy::MidpointAwayFromZero)
}

fn money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(SCALE_MONEY, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    const PRICE: Decimal = dec!(3_100_000);

    #[test]
    fn three_aligned_months_bill_three_monthly_prices() {
        let quote = quote_for_period(PRICE, d("2025-01-01"), d("2025-03-31")).unwrap();
        assert_eq!(quote.subtotal, dec!(9_300_000.00));
        assert_eq!(quote.discount_amount, Decimal::ZERO);
        assert_eq!(quote.total, dec!(9_300_000.00));
        assert_eq!(quote.lines.len(), 3);
        assert_eq!(quote.discount_rate, Decimal::ZERO);
    }

    #[test]
    fn partial_month_prorates_at_fixed_divisor() {
        // 3,100,000 / 31 = 100,000 per day regardless of month length.
        let quote = quote_for_period(PRICE, d("2025-01-15"), d("2025-01-31")).unwrap();
        assert_eq!(quote.lines.len(), 1);
        assert_eq!(quote.lines[0].billable_days, 17);
        assert_eq!(quote.subtotal, dec!(1_700_000.00));
    }

    #[test]
    fn quote_is_additive_across_a_month_boundary_split() {
        let full = quote_for_period(PRICE, d("2025-01-10"), d("2025-03-20")).unwrap();
        let left = quote_for_period(PRICE, d("2025-01-10"), d("2025-01-31")).unwrap();
        let right = quote_for_period(PRICE, d("2025-02-01"), d("2025-03-20")).unwrap();
        assert_eq!(full.subtotal, left.subtotal + right.subtotal);
        // All three spans are under the 3-month discount threshold.
        assert_eq!(full.total, left.total + right.total);
    }

    #[test]
    fn tier_boundaries_are_inclusive_at_threshold() {
        assert_eq!(tier_for_months(0), Decimal::ZERO);
        assert_eq!(tier_for_months(2), Decimal::ZERO);
        assert_eq!(tier_for_months(3), dec!(0.05));
        assert_eq!(tier_for_months(5), dec!(0.05));
        assert_eq!(tier_for_months(6), dec!(0.06));
        assert_eq!(tier_for_months(11), dec!(0.06));
        assert_eq!(tier_for_months(12), dec!(0.08));
        assert_eq!(tier_for_months(36), dec!(0.08));
    }

    #[test]
    fn six_whole_months_reach_the_six_percent_tier() {
        let quote = quote_for_period(PRICE, d("2025-01-01"), d("2025-07-01")).unwrap();
        assert_eq!(quote.whole_months, 6);
        assert_eq!(quote.discount_rate, dec!(0.06));
        assert_eq!(quote.total, quote.subtotal - quote.discount_amount);
    }

    #[test]
    fn whole_month_count_uses_inclusive_end() {
        assert_eq!(count_whole_months(d("2025-01-01"), d("2025-03-31")), 2);
        assert_eq!(count_whole_months(d("2025-01-01"), d("2025-04-01")), 3);
        assert_eq!(count_whole_months(d("2025-01-01"), d("2025-01-30")), 0);
        // Month-end clamping: Jan 31 -> Feb 28 -> Mar 28.
        assert_eq!(count_whole_months(d("2025-01-31"), d("2025-03-27")), 1);
        assert_eq!(count_whole_months(d("2025-01-31"), d("2025-03-28")), 2);
    }

    #[test]
    fn negative_price_is_rejected() {
        assert_eq!(
            quote_for_period(dec!(-1), d("2025-01-01"), d("2025-01-31")),
            Err(BillingError::NegativePrice)
        );
        assert_eq!(
            quote_single_month(dec!(-1), d("2025-01-01"), None, p("2025-01")),
            Err(BillingError::NegativePrice)
        );
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert_eq!(
            quote_for_period(PRICE, d("2025-02-01"), d("2025-01-01")),
            Err(BillingError::EndBeforeStart)
        );
    }

    #[test]
    fn single_month_full_overlap_bills_the_monthly_price() {
        // Actual days-in-month proration: 28/28 of the price for February.
        let amount =
            quote_single_month(dec!(2_800_000), d("2025-02-01"), None, p("2025-02")).unwrap();
        assert_eq!(amount, dec!(2_800_000.00));
    }

    #[test]
    fn single_month_clips_to_booking_end() {
        let amount = quote_single_month(
            dec!(2_800_000),
            d("2025-02-01"),
            Some(d("2025-02-14")),
            p("2025-02"),
        )
        .unwrap();
        assert_eq!(amount, dec!(1_400_000.00));
    }

    #[test]
    fn single_month_no_overlap_is_zero() {
        let amount = quote_single_month(
            PRICE,
            d("2025-05-01"),
            Some(d("2025-06-30")),
            p("2025-02"),
        )
        .unwrap();
        assert_eq!(amount, Decimal::ZERO);

        let ended_before = quote_single_month(
            PRICE,
            d("2024-01-01"),
            Some(d("2024-12-31")),
            p("2025-02"),
        )
        .unwrap();
        assert_eq!(ended_before, Decimal::ZERO);
    }

    #[test]
    fn single_month_discount_uses_booking_span() {
        // Sep 2024 .. Mar 2025 is 6 whole months: 6% off the full month.
        let amount = quote_single_month(
            dec!(3_100_000),
            d("2024-09-01"),
            Some(d("2025-03-31")),
            p("2025-03"),
        )
        .unwrap();
        assert_eq!(amount, dec!(2_914_000.00));
    }
}
