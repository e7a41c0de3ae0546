//! Billing periods and the clock they are measured against.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Midnight UTC on the first day of the month after `now`.
pub fn next_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|start| Utc.from_utc_datetime(&start))
        // Only unreachable at chrono's maximum representable year.
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn mid_month_rolls_to_first_of_next() {
        assert_eq!(next_period_start(at(2026, 3, 17, 15)), at(2026, 4, 1, 0));
    }

    #[test]
    fn december_rolls_to_january() {
        assert_eq!(next_period_start(at(2026, 12, 31, 23)), at(2027, 1, 1, 0));
    }

    #[test]
    fn first_instant_of_month_rolls_forward() {
        assert_eq!(next_period_start(at(2026, 5, 1, 0)), at(2026, 6, 1, 0));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(at(2026, 1, 31, 12));
        clock.advance(Duration::days(1));
        assert_eq!(clock.now(), at(2026, 2, 1, 12));
        clock.set(at(2020, 1, 1, 0));
        assert_eq!(clock.now(), at(2020, 1, 1, 0));
    }
}
