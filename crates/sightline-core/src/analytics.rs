//! Analytics backend abstraction.
//!
//! A backend supplies the storage primitives (insert, range-select,
//! group-count, delete-where, funnel lookup). Every report operation is a
//! provided method that range-selects once and hands the events to the pure
//! computations in [`crate::report`], [`crate::funnel`],
//! [`crate::timeseries`] and [`crate::revenue`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::event::{Event, EventKind};
use crate::funnel::{analyze_funnel_events, goal_conversions, FunnelAnalysis, GoalConversions};
use crate::report::{build_report, ProjectReport};
use crate::revenue::{
    revenue_by_event_name, revenue_by_traffic_source, summarize_revenue, RevenueByEvent,
    RevenueBySource, RevenueSummary,
};
use crate::timeseries::{
    build_calendar, build_time_series, calendar_range, CalendarDay, TimeFilter, TimeSeriesPoint,
};

/// Match criterion shared by goals and funnel steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    /// Matches a pageview whose path equals the value.
    Url,
    /// Matches a custom event whose name equals the value.
    Event,
}

impl GoalType {
    /// Unknown types are not an error; callers treat them as "never matches".
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "url" => Some(Self::Url),
            "event" => Some(Self::Event),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Event => "event",
        }
    }

    /// Whether a single event satisfies this criterion.
    pub fn matches(
        self,
        kind: EventKind,
        event_name: Option<&str>,
        path: &str,
        match_value: &str,
    ) -> bool {
        match self {
            Self::Url => kind == EventKind::Pageview && path == match_value,
            Self::Event => kind == EventKind::Custom && event_name == Some(match_value),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub project_id: String,
    pub name: String,
    /// Stored as text; see [`GoalType::parse`].
    pub goal_type: String,
    pub match_value: String,
    pub active: bool,
}

impl Goal {
    pub fn kind(&self) -> Option<GoalType> {
        GoalType::parse(&self.goal_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    pub id: String,
    pub funnel_id: String,
    pub step_number: u32,
    pub step_type: String,
    pub match_value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funnel {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub steps: Vec<FunnelStep>,
}

/// Bucket width for [`AnalyticsBackend::group_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Hour,
    Day,
    /// ISO week, starting Monday.
    Week,
}

impl GroupKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    /// Start of the bucket, UTC.
    pub bucket: NaiveDateTime,
    pub events: i64,
    pub visitors: i64,
}

#[async_trait]
pub trait AnalyticsBackend: Send + Sync + 'static {
    /// Store one event and return its assigned id.
    async fn insert_event(&self, event: &Event) -> Result<i64>;

    /// All events of a project with `start <= created_at <= end`, ordered by
    /// timestamp then id.
    async fn select_range(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>>;

    /// Pageview and distinct-visitor counts per time bucket, ascending. Other
    /// event kinds are not counted.
    async fn group_count(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        key: GroupKey,
    ) -> Result<Vec<GroupCount>>;

    /// Retention sweep: delete every event older than `cutoff`.
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn delete_project_events(&self, project_id: &str) -> Result<u64>;

    /// Funnel with its steps ordered by `step_number`.
    async fn get_funnel(&self, project_id: &str, funnel_id: &str) -> Result<Option<Funnel>>;

    async fn generate_report(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        heartbeat_interval_seconds: u32,
    ) -> Result<ProjectReport> {
        let events = self.select_range(project_id, start, end).await?;
        Ok(build_report(
            project_id,
            start,
            end,
            &events,
            heartbeat_interval_seconds,
        ))
    }

    async fn generate_time_series(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        filter: TimeFilter,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let counts = self
            .group_count(project_id, start, end, filter.granularity())
            .await?;
        Ok(build_time_series(counts))
    }

    /// One row per day for the 365 days ending on `today`.
    async fn contribution_calendar(
        &self,
        project_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<CalendarDay>> {
        let (start, end) = calendar_range(today);
        let counts = self
            .group_count(project_id, start, end, GroupKey::Day)
            .await?;
        Ok(build_calendar(today, &counts))
    }

    async fn calculate_goal_conversions(
        &self,
        goal_type: &str,
        match_value: &str,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GoalConversions> {
        if GoalType::parse(goal_type).is_none() {
            tracing::debug!(goal_type, project_id, "Unknown goal type, reporting zero conversions");
            return Ok(GoalConversions::default());
        }
        let events = self.select_range(project_id, start, end).await?;
        Ok(goal_conversions(goal_type, match_value, &events))
    }

    async fn analyze_funnel(
        &self,
        funnel_id: &str,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<FunnelAnalysis> {
        let Some(funnel) = self.get_funnel(project_id, funnel_id).await? else {
            return Err(CoreError::NotFound(format!("funnel {funnel_id}")).into());
        };
        if funnel.steps.is_empty() {
            return Ok(FunnelAnalysis::empty(&funnel));
        }
        let events = self.select_range(project_id, start, end).await?;
        Ok(analyze_funnel_events(&funnel, &events, start))
    }

    /// Revenue totals for the range and for the preceding range of equal length.
    async fn revenue_summary(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RevenueSummary> {
        let current = self.select_range(project_id, start, end).await?;
        let (prev_start, prev_end) = previous_period(start, end);
        let previous = self.select_range(project_id, prev_start, prev_end).await?;
        Ok(summarize_revenue(&current, &previous))
    }

    async fn revenue_by_event(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RevenueByEvent>> {
        let events = self.select_range(project_id, start, end).await?;
        Ok(revenue_by_event_name(&events))
    }

    async fn revenue_by_source(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RevenueBySource>> {
        let events = self.select_range(project_id, start, end).await?;
        Ok(revenue_by_traffic_source(&events))
    }
}

/// The range of equal length ending just before `start`.
pub fn previous_period(start: DateTime<Utc>, end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let length = end - start;
    let prev_end = start - chrono::Duration::microseconds(1);
    (prev_end - length, prev_end)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn goal_type_matching_rules() {
        assert!(GoalType::Url.matches(EventKind::Pageview, None, "/done", "/done"));
        assert!(!GoalType::Url.matches(EventKind::Custom, Some("x"), "/done", "/done"));
        assert!(GoalType::Event.matches(EventKind::Custom, Some("buy"), "/", "buy"));
        assert!(!GoalType::Event.matches(EventKind::Pageview, Some("buy"), "/", "buy"));
        assert_eq!(GoalType::parse("funnel"), None);
    }

    #[test]
    fn previous_period_has_equal_length_and_ends_before_start() {
        let start = Utc.with_ymd_and_hms(2026, 3, 8, 0, 0, 0).single().expect("date");
        let end = Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 59).single().expect("date");
        let (prev_start, prev_end) = previous_period(start, end);
        assert!(prev_end < start);
        assert_eq!(prev_end - prev_start, end - start);
    }
}
