//! Calendar month arithmetic
//!
//! A [`Period`] is a year-month pair ("2025-09"), the unit RENT bills are
//! keyed on. Stored in the database as the first day of the month.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    /// 1-based calendar month.
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> NaiveDate {
        // Day 1 of a valid (year, month) always exists.
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        self.next().first_day() - chrono::Duration::days(1)
    }

    pub fn days_in_month(self) -> u32 {
        self.last_day().day()
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn plus_months(self, n: u32) -> Self {
        Period::from_date(self.first_day() + Months::new(n))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Parses "YYYY-MM".
impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || format!("invalid period '{}', expected YYYY-MM", s);
        let (y, m) = s.trim().split_once('-').ok_or_else(err)?;
        let year: i32 = y.parse().map_err(|_| err())?;
        let month: u32 = m.parse().map_err(|_| err())?;
        Period::new(year, month).ok_or_else(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn days_in_month_handles_february_and_leap_years() {
        assert_eq!(Period::new(2025, 2).unwrap().days_in_month(), 28);
        assert_eq!(Period::new(2024, 2).unwrap().days_in_month(), 29);
        assert_eq!(Period::new(2025, 1).unwrap().days_in_month(), 31);
        assert_eq!(Period::new(2025, 4).unwrap().days_in_month(), 30);
    }

    #[test]
    fn next_and_prev_roll_over_year_boundaries() {
        let dec = Period::new(2024, 12).unwrap();
        assert_eq!(dec.next(), Period::new(2025, 1).unwrap());
        assert_eq!(dec.next().prev(), dec);
    }

    #[test]
    fn parse_round_trips_display() {
        let p: Period = "2025-09".parse().unwrap();
        assert_eq!(p, Period::new(2025, 9).unwrap());
        assert_eq!(p.to_string(), "2025-09");
        assert!("2025-13".parse::<Period>().is_err());
        assert!("september".parse::<Period>().is_err());
    }

    #[test]
    fn first_and_last_day_bound_the_month() {
        let p = Period::new(2025, 2).unwrap();
        assert_eq!(p.first_day(), NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(p.last_day(), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }
}
