use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::analytics::{GroupCount, GroupKey};
use crate::error::CoreError;

pub const CALENDAR_DAYS: i64 = 365;

/// Dashboard range selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFilter {
    #[serde(rename = "24h")]
    Last24Hours,
    #[serde(rename = "3d")]
    Last3Days,
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "365d")]
    Last365Days,
}

impl TimeFilter {
    pub fn granularity(self) -> GroupKey {
        match self {
            Self::Last24Hours => GroupKey::Hour,
            Self::Last3Days | Self::Last7Days => GroupKey::Day,
            Self::Last30Days | Self::Last365Days => GroupKey::Week,
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Self::Last24Hours => Duration::hours(24),
            Self::Last3Days => Duration::days(3),
            Self::Last7Days => Duration::days(7),
            Self::Last30Days => Duration::days(30),
            Self::Last365Days => Duration::days(365),
        }
    }

    /// `[now - duration, now]`.
    pub fn range_ending(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.duration(), now)
    }
}

impl FromStr for TimeFilter {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "24h" => Ok(Self::Last24Hours),
            "3d" => Ok(Self::Last3Days),
            "7d" => Ok(Self::Last7Days),
            "30d" => Ok(Self::Last30Days),
            "365d" => Ok(Self::Last365Days),
            other => Err(CoreError::InvalidFilter(format!(
                "filter must be one of 24h, 3d, 7d, 30d, 365d (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub bucket: NaiveDateTime,
    pub views: i64,
    pub unique_visitors: i64,
}

pub fn build_time_series(mut counts: Vec<GroupCount>) -> Vec<TimeSeriesPoint> {
    counts.sort_by_key(|c| c.bucket);
    counts
        .into_iter()
        .map(|c| TimeSeriesPoint {
            bucket: c.bucket,
            views: c.events,
            unique_visitors: c.visitors,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub visits: i64,
    pub unique_visitors: i64,
    /// 0 to 4.
    pub level: u8,
}

/// Intensity relative to the busiest day of the period.
pub fn intensity_level(visits: i64, max: i64) -> u8 {
    if visits <= 0 || max <= 0 {
        return 0;
    }
    let ratio = visits as f64 / max as f64;
    if ratio <= 0.25 {
        1
    } else if ratio <= 0.5 {
        2
    } else if ratio <= 0.75 {
        3
    } else {
        4
    }
}

/// Start of the first day through the end of `today`.
pub fn calendar_range(today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let first = today - Duration::days(CALENDAR_DAYS - 1);
    let start = Utc.from_utc_datetime(&first.and_time(chrono::NaiveTime::MIN));
    let end = Utc.from_utc_datetime(&(today + Duration::days(1)).and_time(chrono::NaiveTime::MIN))
        - Duration::microseconds(1);
    (start, end)
}

/// Zero-filled daily rows for the year ending on `today`, oldest first.
pub fn build_calendar(today: NaiveDate, counts: &[GroupCount]) -> Vec<CalendarDay> {
    let by_day: HashMap<NaiveDate, &GroupCount> =
        counts.iter().map(|c| (c.bucket.date(), c)).collect();
    let max = counts.iter().map(|c| c.events).max().unwrap_or(0);
    (0..CALENDAR_DAYS)
        .rev()
        .map(|back| {
            let date = today - Duration::days(back);
            let (visits, unique_visitors) = by_day
                .get(&date)
                .map(|c| (c.events, c.visitors))
                .unwrap_or((0, 0));
            CalendarDay {
                date,
                visits,
                unique_visitors,
                level: intensity_level(visits, max),
            }
        })
        .collect()
}
