//! Calendar periods and the UTC windows anchored to "now".
//!
//! Two granularities exist:
//! - [`Period`]: a rule's limit window, minute through year
//! - [`PeriodType`]: the summary buckets the aggregation engine maintains (daily, weekly, monthly)
//!
//! Every window is half-open: `[start, end)`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A half-open UTC time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Limit window of a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Period {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Minute => "minute",
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
        }
    }

    /// The calendar window of this granularity that contains `now`.
    pub fn window(self, now: DateTime<Utc>) -> Window {
        match self {
            Period::Minute => {
                let start = midnight(now.date_naive())
                    + Duration::hours(i64::from(now.hour()))
                    + Duration::minutes(i64::from(now.minute()));
                Window {
                    start,
                    end: start + Duration::minutes(1),
                }
            }
            Period::Hour => {
                let start = midnight(now.date_naive()) + Duration::hours(i64::from(now.hour()));
                Window {
                    start,
                    end: start + Duration::hours(1),
                }
            }
            Period::Day => PeriodType::Daily.window(now),
            Period::Week => PeriodType::Weekly.window(now),
            Period::Month => PeriodType::Monthly.window(now),
            Period::Year => {
                let start = midnight(first_of_year(now.year()));
                Window {
                    start,
                    end: midnight(first_of_year(now.year() + 1)),
                }
            }
        }
    }

    /// The summary bucket with the same extent, if the aggregation engine maintains one.
    pub fn summary_period(self) -> Option<PeriodType> {
        match self {
            Period::Day => Some(PeriodType::Daily),
            Period::Week => Some(PeriodType::Weekly),
            Period::Month => Some(PeriodType::Monthly),
            Period::Minute | Period::Hour | Period::Year => None,
        }
    }
}

/// Summary bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    pub const ALL: [PeriodType; 3] = [PeriodType::Daily, PeriodType::Weekly, PeriodType::Monthly];

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
        }
    }

    /// Current calendar day, ISO week (Monday start) or month containing `now`.
    pub fn window(self, now: DateTime<Utc>) -> Window {
        let today = now.date_naive();
        match self {
            PeriodType::Daily => {
                let start = midnight(today);
                Window {
                    start,
                    end: start + Duration::days(1),
                }
            }
            PeriodType::Weekly => {
                let back = i64::from(today.weekday().num_days_from_monday());
                let start = midnight(today - Duration::days(back));
                Window {
                    start,
                    end: start + Duration::days(7),
                }
            }
            PeriodType::Monthly => {
                let (year, month) = (today.year(), today.month());
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                Window {
                    start: midnight(first_of_month(year, month)),
                    end: midnight(first_of_month(next_year, next_month)),
                }
            }
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    // Day 1 of a month in 1..=12 always exists
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn first_of_year(year: i32) -> NaiveDate {
    first_of_month(year, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn daily_window_covers_calendar_day() {
        let w = PeriodType::Daily.window(at("2025-03-14T15:09:26Z"));
        assert_eq!(w.start, at("2025-03-14T00:00:00Z"));
        assert_eq!(w.end, at("2025-03-15T00:00:00Z"));
    }

    #[test]
    fn weekly_window_starts_monday() {
        // 2025-03-16 is a Sunday
        let w = PeriodType::Weekly.window(at("2025-03-16T23:59:59Z"));
        assert_eq!(w.start, at("2025-03-10T00:00:00Z"));
        assert_eq!(w.end, at("2025-03-17T00:00:00Z"));

        let monday = PeriodType::Weekly.window(at("2025-03-17T00:00:00Z"));
        assert_eq!(monday.start, at("2025-03-17T00:00:00Z"));
    }

    #[test]
    fn monthly_window_rolls_over_year() {
        let w = PeriodType::Monthly.window(at("2024-12-31T12:00:00Z"));
        assert_eq!(w.start, at("2024-12-01T00:00:00Z"));
        assert_eq!(w.end, at("2025-01-01T00:00:00Z"));

        let feb = PeriodType::Monthly.window(at("2024-02-29T08:00:00Z"));
        assert_eq!(feb.end, at("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn rule_periods_truncate() {
        let now = at("2025-07-04T10:42:17.250Z");
        assert_eq!(Period::Minute.window(now).start, at("2025-07-04T10:42:00Z"));
        assert_eq!(Period::Hour.window(now).end, at("2025-07-04T11:00:00Z"));
        assert_eq!(Period::Year.window(now).start, at("2025-01-01T00:00:00Z"));
        assert_eq!(Period::Year.window(now).end, at("2026-01-01T00:00:00Z"));
        assert!(Period::Minute.window(now).contains(now));
    }

    #[test]
    fn only_calendar_buckets_have_summaries() {
        assert_eq!(Period::Day.summary_period(), Some(PeriodType::Daily));
        assert_eq!(Period::Month.summary_period(), Some(PeriodType::Monthly));
        assert_eq!(Period::Minute.summary_period(), None);
        assert_eq!(Period::Year.summary_period(), None);
    }
}
