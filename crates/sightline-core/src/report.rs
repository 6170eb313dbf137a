//! Batch aggregation over a time-bounded event set.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventKind};
use crate::funnel::percent;
use crate::session::group_sessions;
use crate::visitor::extract_referrer_domain;

const TOP_N: usize = 10;
const RECENT_EVENTS: usize = 10;
const PEAK_HOURS: usize = 5;
const PEAK_DAYS: usize = 3;

pub const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakHour {
    pub hour: u32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakDay {
    /// 0 = Sunday.
    pub day: u32,
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakTimes {
    pub top_hours: Vec<PeakHour>,
    pub top_days: Vec<PeakDay>,
    pub peak_hour: Option<PeakHour>,
    pub peak_day: Option<PeakDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub total_sessions: i64,
    pub avg_session_duration_seconds: f64,
    pub entry_pages: Vec<MetricRow>,
    pub exit_pages: Vec<MetricRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentEvent {
    pub kind: EventKind,
    pub event_name: Option<String>,
    pub path: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_events: i64,
    pub pageviews: i64,
    pub unique_visitors: i64,
    pub bounce_rate: f64,
    /// Percent of sessions with at least one custom event.
    pub conversion_rate: f64,
    pub sessions: SessionMetrics,
    pub top_pages: Vec<MetricRow>,
    pub browsers: Vec<MetricRow>,
    pub operating_systems: Vec<MetricRow>,
    pub devices: Vec<MetricRow>,
    pub referrers: Vec<MetricRow>,
    pub countries: Vec<MetricRow>,
    pub regions: Vec<MetricRow>,
    pub utm_sources: Vec<MetricRow>,
    pub utm_mediums: Vec<MetricRow>,
    pub utm_campaigns: Vec<MetricRow>,
    pub custom_events: Vec<MetricRow>,
    pub scroll_depths: Vec<MetricRow>,
    pub outbound_links: Vec<MetricRow>,
    pub downloads: Vec<MetricRow>,
    /// `[day_of_week][hour]`, day 0 = Sunday.
    pub heatmap: [[i64; 24]; 7],
    pub peak_times: PeakTimes,
    pub recent_events: Vec<RecentEvent>,
}

/// Count labels and keep the `limit` largest. Equal counts keep the order in
/// which each label was first seen.
pub fn top_n<I, S>(labels: I, limit: usize) -> Vec<MetricRow>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<MetricRow> = Vec::new();
    for label in labels {
        let label = label.into();
        match index.get(&label) {
            Some(&slot) => rows[slot].count += 1,
            None => {
                index.insert(label.clone(), rows.len());
                rows.push(MetricRow { label, count: 1 });
            }
        }
    }
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows.truncate(limit);
    rows
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn utm_value(value: Option<&str>) -> Option<&str> {
    non_empty(value).filter(|v| !v.eq_ignore_ascii_case("unknown"))
}

fn breakdown<'a, F>(events: &'a [Event], field: F) -> Vec<MetricRow>
where
    F: Fn(&'a Event) -> Option<&'a str>,
{
    top_n(events.iter().filter_map(field), TOP_N)
}

fn of_kind<'a>(events: &'a [Event], kind: EventKind) -> impl Iterator<Item = &'a Event> {
    events.iter().filter(move |e| e.kind == kind)
}

/// Scroll depths grouped per value, labelled `"<depth>%"`, ascending.
fn scroll_breakdown(events: &[Event]) -> Vec<MetricRow> {
    let mut counts: HashMap<i32, i64> = HashMap::new();
    for depth in of_kind(events, EventKind::Scroll).filter_map(|e| e.scroll_depth) {
        *counts.entry(depth).or_default() += 1;
    }
    let mut depths: Vec<(i32, i64)> = counts.into_iter().collect();
    depths.sort_by_key(|(depth, _)| *depth);
    depths
        .into_iter()
        .take(TOP_N)
        .map(|(depth, count)| MetricRow {
            label: format!("{depth}%"),
            count,
        })
        .collect()
}

pub fn build_heatmap(events: &[Event]) -> [[i64; 24]; 7] {
    let mut grid = [[0i64; 24]; 7];
    for event in events {
        let day = event.created_at.weekday().num_days_from_sunday() as usize;
        let hour = event.created_at.hour() as usize;
        grid[day][hour] += 1;
    }
    grid
}

/// Indices ranked by count, highest first. Ties keep index order, so the
/// earliest hour or day wins.
fn ranked(totals: &[i64]) -> Vec<(usize, i64)> {
    let mut ranked: Vec<(usize, i64)> = totals
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

pub fn peak_times(heatmap: &[[i64; 24]; 7]) -> PeakTimes {
    let mut hour_totals = [0i64; 24];
    let mut day_totals = [0i64; 7];
    for (day, hours) in heatmap.iter().enumerate() {
        for (hour, count) in hours.iter().enumerate() {
            hour_totals[hour] += count;
            day_totals[day] += count;
        }
    }

    let top_hours: Vec<PeakHour> = ranked(&hour_totals)
        .into_iter()
        .take(PEAK_HOURS)
        .map(|(hour, count)| PeakHour {
            hour: hour as u32,
            count,
        })
        .collect();
    let top_days: Vec<PeakDay> = ranked(&day_totals)
        .into_iter()
        .take(PEAK_DAYS)
        .map(|(day, count)| PeakDay {
            day: day as u32,
            name: DAY_NAMES[day].to_string(),
            count,
        })
        .collect();

    PeakTimes {
        peak_hour: top_hours.first().cloned(),
        peak_day: top_days.first().cloned(),
        top_hours,
        top_days,
    }
}

/// Build the full dashboard report from the events of one project and range.
pub fn build_report(
    project_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    events: &[Event],
    heartbeat_interval_seconds: u32,
) -> ProjectReport {
    let sessions = group_sessions(events);
    let total_sessions = sessions.len() as i64;

    let bounced = sessions.iter().filter(|s| s.is_bounce()).count() as i64;
    let converting = sessions.iter().filter(|s| s.has_custom_event()).count() as i64;
    let total_heartbeats: usize = sessions.iter().map(|s| s.heartbeats()).sum();
    let avg_session_duration_seconds = if total_sessions == 0 {
        0.0
    } else {
        (total_heartbeats as f64 * f64::from(heartbeat_interval_seconds)) / total_sessions as f64
    };

    let unique_visitors = events
        .iter()
        .map(|e| e.visitor_hash.as_str())
        .collect::<HashSet<_>>()
        .len() as i64;

    let heatmap = build_heatmap(events);
    let peak_times = peak_times(&heatmap);

    let mut recent: Vec<&Event> = events.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    let recent_events = recent
        .into_iter()
        .take(RECENT_EVENTS)
        .map(|e| RecentEvent {
            kind: e.kind,
            event_name: e.event_name.clone(),
            path: e.path.clone(),
            city: e.city.clone(),
            country: e.country.clone(),
            created_at: e.created_at,
        })
        .collect();

    let pageviews: Vec<&Event> = of_kind(events, EventKind::Pageview).collect();

    ProjectReport {
        project_id: project_id.to_string(),
        start,
        end,
        total_events: events.len() as i64,
        pageviews: pageviews.len() as i64,
        unique_visitors,
        bounce_rate: percent(bounced, total_sessions),
        conversion_rate: percent(converting, total_sessions),
        sessions: SessionMetrics {
            total_sessions,
            avg_session_duration_seconds,
            entry_pages: top_n(sessions.iter().filter_map(|s| s.entry_page()), TOP_N),
            exit_pages: top_n(sessions.iter().filter_map(|s| s.exit_page()), TOP_N),
        },
        top_pages: top_n(pageviews.iter().map(|e| e.path.as_str()), TOP_N),
        browsers: breakdown(events, |e| non_empty(e.browser.as_deref())),
        operating_systems: breakdown(events, |e| non_empty(e.os.as_deref())),
        devices: breakdown(events, |e| non_empty(e.device.as_deref())),
        referrers: top_n(
            events
                .iter()
                .filter_map(|e| e.referrer.as_deref().and_then(extract_referrer_domain)),
            TOP_N,
        ),
        countries: breakdown(events, |e| non_empty(e.country.as_deref())),
        regions: top_n(
            events.iter().filter_map(|e| {
                let region = non_empty(e.region.as_deref())?;
                let country = non_empty(e.country.as_deref())?;
                Some(format!("{region}, {country}"))
            }),
            TOP_N,
        ),
        utm_sources: breakdown(events, |e| utm_value(e.utm_source.as_deref())),
        utm_mediums: breakdown(events, |e| utm_value(e.utm_medium.as_deref())),
        utm_campaigns: breakdown(events, |e| utm_value(e.utm_campaign.as_deref())),
        custom_events: top_n(
            of_kind(events, EventKind::Custom).filter_map(|e| non_empty(e.event_name.as_deref())),
            TOP_N,
        ),
        scroll_depths: scroll_breakdown(events),
        outbound_links: top_n(
            of_kind(events, EventKind::Outbound).filter_map(|e| non_empty(e.target_url.as_deref())),
            TOP_N,
        ),
        downloads: top_n(
            of_kind(events, EventKind::Download).filter_map(|e| non_empty(e.target_url.as_deref())),
            TOP_N,
        ),
        heatmap,
        peak_times,
        recent_events,
    }
}
