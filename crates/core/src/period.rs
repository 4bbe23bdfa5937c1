use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// `[center - days, center + days]`, inclusive on both ends.
    pub fn around(center: NaiveDate, days: i64) -> Self {
        let days = Duration::days(days.max(0));
        DateRange {
            start: center.checked_sub_signed(days).unwrap_or(NaiveDate::MIN),
            end: center.checked_add_signed(days).unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Which date window applies to a candidate comparison.
///
/// The two windows are never interchangeable: the advance-payment window
/// only applies to retainer/deposit amounts and to targets named by an
/// identifier hint, where a payment can precede the event by months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationWindow {
    Standard,
    AdvancePayment,
}

impl ReconciliationWindow {
    pub fn days(self, config: &MatchConfig) -> i64 {
        match self {
            ReconciliationWindow::Standard => config.standard_window_days,
            ReconciliationWindow::AdvancePayment => config.advance_payment_window_days,
        }
    }

    pub fn range(self, center: NaiveDate, config: &MatchConfig) -> DateRange {
        DateRange::around(center, self.days(config))
    }
}

impl fmt::Display for ReconciliationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationWindow::Standard => write!(f, "standard"),
            ReconciliationWindow::AdvancePayment => write!(f, "advance_payment"),
        }
    }
}

/// Absolute number of days between two dates.
pub fn day_gap(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_range_contains_is_inclusive() {
        let range = DateRange::new(date(2013, 6, 1), date(2013, 6, 30));
        assert!(range.contains(date(2013, 6, 1)));
        assert!(range.contains(date(2013, 6, 30)));
        assert!(!range.contains(date(2013, 5, 31)));
        assert!(!range.contains(date(2013, 7, 1)));
    }

    #[test]
    fn around_spans_both_directions() {
        let range = DateRange::around(date(2013, 6, 10), 14);
        assert_eq!(range.start, date(2013, 5, 27));
        assert_eq!(range.end, date(2013, 6, 24));
    }

    #[test]
    fn windows_read_distinct_config_values() {
        let config = MatchConfig::default();
        let center = date(2013, 6, 10);
        let standard = ReconciliationWindow::Standard.range(center, &config);
        let advance = ReconciliationWindow::AdvancePayment.range(center, &config);
        assert!(!standard.contains(date(2013, 9, 1)));
        assert!(advance.contains(date(2013, 9, 1)));
    }

    #[test]
    fn day_gap_is_absolute() {
        assert_eq!(day_gap(date(2013, 6, 10), date(2013, 6, 12)), 2);
        assert_eq!(day_gap(date(2013, 6, 12), date(2013, 6, 10)), 2);
    }

    #[test]
    fn date_range_display() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(range.to_string(), "2024-01-01 to 2024-12-31");
    }
}
