//! Engine time source
//!
//! Every "today"/"now" the engine uses comes from an explicit [`Clock`] value
//! rather than ambient wall-clock calls, so the whole booking/payment engine
//! can be pinned to a date in tests or demos.
//!
//! Modes:
//! - `REALTIME`: wall clock in the configured zone
//! - `MANUAL`: a pinned date/time held in configuration
//! - `AUTO_TICK`: pinned base plus wall-clock elapsed time since construction

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use std::time::Instant;

/// Default zone offset when none is configured (UTC+7).
const DEFAULT_OFFSET_SECS: i32 = 7 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Realtime,
    Manual,
    AutoTick,
}

#[derive(Debug, Clone)]
pub struct Clock {
    mode: ClockMode,
    offset: FixedOffset,
    /// Pinned base instant; only consulted in MANUAL and AUTO_TICK modes.
    pinned: NaiveDateTime,
    booted: Instant,
    renew_h_minus: i64,
}

impl Clock {
    pub fn realtime(offset: FixedOffset) -> Self {
        Self {
            mode: ClockMode::Realtime,
            offset,
            pinned: NaiveDateTime::default(),
            booted: Instant::now(),
            renew_h_minus: 1,
        }
    }

    pub fn manual(pinned: NaiveDateTime, offset: FixedOffset) -> Self {
        Self {
            mode: ClockMode::Manual,
            offset,
            pinned,
            booted: Instant::now(),
            renew_h_minus: 1,
        }
    }

    pub fn auto_tick(base: NaiveDateTime, offset: FixedOffset) -> Self {
        Self {
            mode: ClockMode::AutoTick,
            offset,
            pinned: base,
            booted: Instant::now(),
            renew_h_minus: 1,
        }
    }

    /// Build a clock from configuration strings.
    ///
    /// Any malformed value degrades to REALTIME; the engine never refuses to
    /// start over a bad date pin.
    pub fn from_settings(
        mode: Option<&str>,
        offset: Option<&str>,
        datetime: Option<&str>,
        date: Option<&str>,
        time: Option<&str>,
        renew_h_minus: Option<&str>,
    ) -> Self {
        let offset = offset
            .and_then(|s| s.parse::<FixedOffset>().ok())
            .unwrap_or_else(default_offset);

        let mode = match mode.map(str::trim) {
            Some("MANUAL") => ClockMode::Manual,
            Some("AUTO_TICK") => ClockMode::AutoTick,
            _ => ClockMode::Realtime,
        };

        let mut clock = match mode {
            ClockMode::Realtime => Clock::realtime(offset),
            ClockMode::Manual | ClockMode::AutoTick => {
                match resolve_pinned(datetime, date, time) {
                    Some(pinned) if mode == ClockMode::Manual => Clock::manual(pinned, offset),
                    Some(pinned) => Clock::auto_tick(pinned, offset),
                    // Pin requested but unparseable: fall back to wall clock.
                    None => Clock::realtime(offset),
                }
            }
        };

        clock.renew_h_minus = renew_h_minus.and_then(|s| s.parse().ok()).unwrap_or(1);
        clock
    }

    /// Build a clock from `APP_DATE_MODE` / `APP_UTC_OFFSET` / `APP_DATETIME`
    /// / `APP_DATE` / `APP_TIME` / `RENEW_H_MINUS` environment variables.
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok();
        Self::from_settings(
            var("APP_DATE_MODE").as_deref(),
            var("APP_UTC_OFFSET").as_deref(),
            var("APP_DATETIME").as_deref(),
            var("APP_DATE").as_deref(),
            var("APP_TIME").as_deref(),
            var("RENEW_H_MINUS").as_deref(),
        )
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Days before a booking's end date at which the renewal notice fires.
    pub fn renew_h_minus(&self) -> i64 {
        self.renew_h_minus
    }

    pub fn now(&self) -> NaiveDateTime {
        match self.mode {
            ClockMode::Realtime => self.wall_now(),
            ClockMode::Manual => self.pinned,
            ClockMode::AutoTick => {
                let elapsed =
                    Duration::from_std(self.booted.elapsed()).unwrap_or_else(|_| Duration::zero());
                self.pinned + elapsed
            }
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    fn wall_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

fn default_offset() -> FixedOffset {
    // east_opt only fails past +/-24h; fall back to UTC.
    FixedOffset::east_opt(DEFAULT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Resolve the pinned base: prefer a full ISO datetime, else date + optional
/// time (defaulting to midnight).
fn resolve_pinned(
    datetime: Option<&str>,
    date: Option<&str>,
    time: Option<&str>,
) -> Option<NaiveDateTime> {
    if let Some(s) = datetime {
        if let Ok(dt) = s.trim().parse::<NaiveDateTime>() {
            return Some(dt);
        }
        return None;
    }
    let date = date?.trim().parse::<NaiveDate>().ok()?;
    let time = match time {
        Some(s) => s.trim().parse::<NaiveTime>().ok()?,
        None => NaiveTime::default(),
    };
    Some(date.and_time(time))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pinned() -> NaiveDateTime {
        "2025-09-10T12:34:56".parse().unwrap()
    }

    #[test]
    fn manual_mode_returns_the_pin() {
        let clock = Clock::manual(pinned(), default_offset());
        assert_eq!(clock.now(), pinned());
        assert_eq!(clock.today(), pinned().date());
    }

    #[test]
    fn auto_tick_advances_from_the_pin() {
        let clock = Clock::auto_tick(pinned(), default_offset());
        let now = clock.now();
        assert!(now >= pinned());
        assert!(now - pinned() < Duration::seconds(5));
    }

    #[test]
    fn settings_resolve_datetime_over_date_plus_time() {
        let clock = Clock::from_settings(
            Some("MANUAL"),
            None,
            Some("2025-09-10T12:34:56"),
            Some("2024-01-01"),
            Some("08:00"),
            None,
        );
        assert_eq!(clock.now(), pinned());
    }

    #[test]
    fn settings_fall_back_to_date_and_time() {
        let clock = Clock::from_settings(
            Some("MANUAL"),
            None,
            None,
            Some("2025-09-10"),
            Some("12:34:56"),
            None,
        );
        assert_eq!(clock.now(), pinned());
    }

    #[test]
    fn date_without_time_pins_to_midnight() {
        let clock =
            Clock::from_settings(Some("MANUAL"), None, None, Some("2025-09-10"), None, None);
        assert_eq!(clock.now(), "2025-09-10T00:00:00".parse().unwrap());
    }

    #[test]
    fn malformed_pin_falls_back_to_realtime() {
        let clock = Clock::from_settings(
            Some("MANUAL"),
            None,
            Some("not-a-datetime"),
            None,
            None,
            None,
        );
        assert_eq!(clock.mode(), ClockMode::Realtime);
    }

    #[test]
    fn unknown_mode_is_realtime() {
        let clock = Clock::from_settings(Some("WARP_SPEED"), None, None, None, None, None);
        assert_eq!(clock.mode(), ClockMode::Realtime);
    }

    #[test]
    fn renew_h_minus_defaults_to_one() {
        let clock = Clock::from_settings(None, None, None, None, None, None);
        assert_eq!(clock.renew_h_minus(), 1);
        let clock = Clock::from_settings(None, None, None, None, None, Some("3"));
        assert_eq!(clock.renew_h_minus(), 3);
    }
}
