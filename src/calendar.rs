//! Wall-clock access and fixed-timezone date keys.
//!
//! Every partition key, week range and report label is computed here from a
//! single configured timezone. Nothing in this module touches the store.

use crate::errors::CoreError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::sync::Mutex;

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for simulations and tests.
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
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    tz: Tz,
}

impl Calendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// `YYYY-MM-DD` of `instant` in the configured timezone.
    pub fn day_key(&self, instant: DateTime<Utc>) -> String {
        date_key(self.local_date(instant))
    }

    /// Monday and Friday keys of the business week containing `instant`.
    pub fn week_range(&self, instant: DateTime<Utc>) -> (String, String) {
        let (monday, friday) = week_range_for(self.local_date(instant));
        (date_key(monday), date_key(friday))
    }

    /// Every Monday-to-Friday key of the month, ascending. Empty for an
    /// out-of-range month.
    pub fn month_business_day_keys(&self, year: i32, month: u32) -> Vec<String> {
        let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
            return Vec::new();
        };
        first
            .iter_days()
            .take_while(|date| date.month() == month)
            .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
            .map(date_key)
            .collect()
    }

    pub fn time_label(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.tz).format("%H:%M:%S").to_string()
    }

    /// Resolves a local wall-clock time on `date` to an instant. Ambiguous
    /// times (DST fall-back) resolve to the earlier instant.
    pub fn at_local(&self, date: NaiveDate, hour: u32, min: u32, sec: u32) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(hour, min, sec)?;
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DAY_KEY_FORMAT).to_string()
}

pub fn parse_day_key(key: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(key, DAY_KEY_FORMAT)
        .map_err(|_| CoreError::invalid(format!("`{key}` is not a YYYY-MM-DD day key")))
}

/// Saturday and Sunday fall in the week that just ended.
pub fn week_range_for(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_york() -> Calendar {
        Calendar::new(chrono_tz::America::New_York)
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid rfc3339")
    }

    #[test]
    fn day_key_splits_at_local_midnight() {
        let cal = new_york();
        let before = utc("2026-03-10T03:59:00Z");
        let after = utc("2026-03-10T04:01:00Z");
        assert_eq!(cal.day_key(before), "2026-03-09");
        assert_eq!(cal.day_key(after), "2026-03-10");
    }

    #[test]
    fn day_key_differs_from_utc_date() {
        let cal = new_york();
        assert_eq!(cal.day_key(utc("2026-10-20T02:00:00Z")), "2026-10-19");
    }

    #[test]
    fn week_range_midweek() {
        let cal = new_york();
        let wednesday = utc("2026-10-21T15:00:00Z");
        assert_eq!(
            cal.week_range(wednesday),
            ("2026-10-19".to_string(), "2026-10-23".to_string())
        );
    }

    #[test]
    fn weekend_belongs_to_completed_week() {
        let saturday = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let sunday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let expected = (
            NaiveDate::from_ymd_opt(2026, 10, 12).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        );
        assert_eq!(week_range_for(saturday), expected);
        assert_eq!(week_range_for(sunday), expected);
    }

    #[test]
    fn month_business_days_skip_weekends() {
        let keys = new_york().month_business_day_keys(2026, 2);
        assert_eq!(keys.len(), 20);
        assert_eq!(keys.first().map(String::as_str), Some("2026-02-02"));
        assert_eq!(keys.last().map(String::as_str), Some("2026-02-27"));
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn month_business_days_invalid_month_is_empty() {
        assert!(new_york().month_business_day_keys(2026, 13).is_empty());
    }

    #[test]
    fn time_label_uses_local_time() {
        let cal = new_york();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let instant = cal.at_local(date, 9, 5, 0).unwrap();
        assert_eq!(instant, utc("2026-10-19T13:05:00Z"));
        assert_eq!(cal.time_label(instant), "09:05:00");
    }

    #[test]
    fn parse_day_key_rejects_garbage() {
        assert!(parse_day_key("2026-10-19").is_ok());
        assert!(parse_day_key("10/19/2026").is_err());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(utc("2026-10-19T12:00:00Z"));
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), utc("2026-10-19T12:05:00Z"));
    }
}
