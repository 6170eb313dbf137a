//! Revenue attribution. Revenue lives in a custom event's properties as
//! `{"revenue": <number>}`; there is no dedicated column.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::event::{Event, EventKind};
use crate::funnel::percent;
use crate::session::group_sessions;

const TOP_EVENTS: usize = 20;

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Revenue carried by a single event, if any.
pub fn event_revenue(event: &Event) -> Option<f64> {
    if event.kind != EventKind::Custom {
        return None;
    }
    let raw = event.properties.as_deref()?;
    let props: serde_json::Value = serde_json::from_str(raw).ok()?;
    props
        .get("revenue")
        .and_then(serde_json::Value::as_f64)
        .filter(|v| v.is_finite())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueMetrics {
    pub total_revenue: f64,
    pub transactions: i64,
    pub average_order_value: f64,
    pub revenue_per_visitor: f64,
    pub unique_visitors: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueSummary {
    pub current: RevenueMetrics,
    pub previous: RevenueMetrics,
    /// Percent change of total revenue; `None` when the previous period had none.
    pub revenue_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueByEvent {
    pub event_name: String,
    pub revenue: f64,
    pub transactions: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueBySource {
    pub source: String,
    pub revenue: f64,
    pub transactions: i64,
    pub sessions: i64,
    pub converting_sessions: i64,
    pub conversion_rate: f64,
}

pub fn revenue_metrics(events: &[Event]) -> RevenueMetrics {
    let amounts: Vec<f64> = events.iter().filter_map(event_revenue).collect();
    let total: f64 = amounts.iter().sum();
    let transactions = amounts.len() as i64;
    let unique_visitors = events
        .iter()
        .map(|e| e.visitor_hash.as_str())
        .collect::<HashSet<_>>()
        .len() as i64;
    RevenueMetrics {
        total_revenue: round2(total),
        transactions,
        average_order_value: if transactions == 0 {
            0.0
        } else {
            round2(total / transactions as f64)
        },
        revenue_per_visitor: if unique_visitors == 0 {
            0.0
        } else {
            round2(total / unique_visitors as f64)
        },
        unique_visitors,
    }
}

pub fn summarize_revenue(current: &[Event], previous: &[Event]) -> RevenueSummary {
    let current = revenue_metrics(current);
    let previous = revenue_metrics(previous);
    let revenue_change = (previous.total_revenue > 0.0).then(|| {
        round2(100.0 * (current.total_revenue - previous.total_revenue) / previous.total_revenue)
    });
    RevenueSummary {
        current,
        previous,
        revenue_change,
    }
}

/// Top event names by revenue.
pub fn revenue_by_event_name(events: &[Event]) -> Vec<RevenueByEvent> {
    let mut rows: Vec<RevenueByEvent> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for event in events {
        let (Some(amount), Some(name)) = (event_revenue(event), event.event_name.as_deref()) else {
            continue;
        };
        let slot = *index.entry(name).or_insert_with(|| {
            rows.push(RevenueByEvent {
                event_name: name.to_string(),
                revenue: 0.0,
                transactions: 0,
            });
            rows.len() - 1
        });
        rows[slot].revenue += amount;
        rows[slot].transactions += 1;
    }
    rows.sort_by(|a, b| b.revenue.total_cmp(&a.revenue));
    rows.truncate(TOP_EVENTS);
    for row in &mut rows {
        row.revenue = round2(row.revenue);
    }
    rows
}

fn referrer_host(referrer: &str) -> Option<String> {
    let host = Url::parse(referrer).ok()?.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

/// Traffic source of a session's first event: campaign, then source, then
/// referrer host, then `Direct`.
pub fn traffic_source(event: &Event) -> String {
    let pick = |value: Option<&str>| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    pick(event.utm_campaign.as_deref())
        .or_else(|| pick(event.utm_source.as_deref()))
        .or_else(|| event.referrer.as_deref().and_then(referrer_host))
        .unwrap_or_else(|| "Direct".to_string())
}

pub fn revenue_by_traffic_source(events: &[Event]) -> Vec<RevenueBySource> {
    let mut rows: Vec<RevenueBySource> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for session in group_sessions(events) {
        let Some(first) = session.first() else {
            continue;
        };
        let source = traffic_source(first);
        let amounts: Vec<f64> = session
            .events
            .iter()
            .filter_map(|e| event_revenue(e))
            .collect();
        let slot = *index.entry(source.clone()).or_insert_with(|| {
            rows.push(RevenueBySource {
                source,
                revenue: 0.0,
                transactions: 0,
                sessions: 0,
                converting_sessions: 0,
                conversion_rate: 0.0,
            });
            rows.len() - 1
        });
        let row = &mut rows[slot];
        row.sessions += 1;
        row.transactions += amounts.len() as i64;
        row.revenue += amounts.iter().sum::<f64>();
        if !amounts.is_empty() {
            row.converting_sessions += 1;
        }
    }
    for row in &mut rows {
        row.revenue = round2(row.revenue);
        row.conversion_rate = round2(percent(row.converting_sessions, row.sessions));
    }
    rows.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then(b.sessions.cmp(&a.sessions))
    });
    rows
}
