//! US market clock. Holidays are not known.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

pub const MARKET_TZ: Tz = chrono_tz::America::New_York;

/// Minutes between ticks.
const TICK_MINUTES: u32 = 15;

pub fn now() -> DateTime<Tz> {
    Utc::now().with_timezone(&MARKET_TZ)
}

/// Weekdays from 09:30 through 16:00 inclusive.
pub fn is_open(t: &DateTime<Tz>) -> bool {
    if matches!(t.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let minutes = t.hour() * 60 + t.minute();
    (9 * 60 + 30..=16 * 60).contains(&minutes)
}

pub fn is_opening_bell(t: &DateTime<Tz>) -> bool {
    t.hour() == 9 && t.minute() == 30
}

pub fn is_closing_bell(t: &DateTime<Tz>) -> bool {
    t.hour() == 16 && t.minute() == 0
}

/// Time from `t` to the next quarter hour.
pub fn until_next_tick(t: &DateTime<Tz>) -> Duration {
    let minutes = TICK_MINUTES - t.minute() % TICK_MINUTES;
    let secs = u64::from(minutes * 60 - t.second());
    Duration::from_secs(secs).saturating_sub(Duration::from_nanos(u64::from(t.nanosecond() % 1_000_000_000)))
}

/// Percent change from `old` to `new`.
pub fn delta(new: f64, old: f64) -> f64 {
    new / old * 100.0 - 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Tz> {
        MARKET_TZ.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn market_hours() {
        // 2024-03-06 is a Wednesday.
        assert!(!is_open(&at(2024, 3, 6, 9, 29, 59)));
        assert!(is_open(&at(2024, 3, 6, 9, 30, 0)));
        assert!(is_open(&at(2024, 3, 6, 12, 0, 0)));
        assert!(is_open(&at(2024, 3, 6, 16, 0, 59)));
        assert!(!is_open(&at(2024, 3, 6, 16, 1, 0)));
        assert!(!is_open(&at(2024, 3, 9, 12, 0, 0)));
        assert!(!is_open(&at(2024, 3, 10, 12, 0, 0)));
    }

    #[test]
    fn bells() {
        assert!(is_opening_bell(&at(2024, 3, 6, 9, 30, 0)));
        assert!(is_closing_bell(&at(2024, 3, 6, 16, 0, 0)));
        assert!(!is_closing_bell(&at(2024, 3, 6, 16, 15, 0)));
    }

    #[test]
    fn next_tick_lands_on_quarter_hour() {
        assert_eq!(until_next_tick(&at(2024, 3, 6, 9, 29, 0)), Duration::from_secs(60));
        assert_eq!(until_next_tick(&at(2024, 3, 6, 9, 14, 30)), Duration::from_secs(30));
        assert_eq!(until_next_tick(&at(2024, 3, 6, 9, 30, 0)), Duration::from_secs(15 * 60));
        assert_eq!(until_next_tick(&at(2024, 3, 6, 9, 52, 10)), Duration::from_secs(7 * 60 + 50));
    }

    #[test]
    fn delta_is_relative_change() {
        assert!((delta(105.0, 100.0) - 5.0).abs() < 1e-9);
        assert!((delta(95.0, 100.0) + 5.0).abs() < 1e-9);
    }
}
