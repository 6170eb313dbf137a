use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of a tracked event. Wire and storage form is the lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pageview,
    Heartbeat,
    Custom,
    Scroll,
    Outbound,
    Download,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Heartbeat => "heartbeat",
            Self::Custom => "custom",
            Self::Scroll => "scroll",
            Self::Outbound => "outbound",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pageview" => Ok(Self::Pageview),
            "heartbeat" => Ok(Self::Heartbeat),
            "custom" => Ok(Self::Custom),
            "scroll" => Ok(Self::Scroll),
            "outbound" => Ok(Self::Outbound),
            "download" => Ok(Self::Download),
            other => Err(CoreError::InvalidEvent(format!("unknown event type {other:?}"))),
        }
    }
}

/// The payload the tracker sends to POST /api/collect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectPayload {
    pub path: String,
    pub referrer: Option<String>,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: EventKind,
    pub event_name: Option<String>,
    /// Free-form object; stored as a serialized JSON string.
    pub properties: Option<serde_json::Value>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub scroll_depth: Option<i32>,
    pub target_url: Option<String>,
}

impl CollectPayload {
    /// `eventName` is required for custom events and forbidden otherwise.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.path.trim().is_empty() {
            return Err(CoreError::InvalidEvent("path is required".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(CoreError::InvalidEvent("sessionId is required".to_string()));
        }
        let has_name = self
            .event_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty());
        match (self.event_type, has_name) {
            (EventKind::Custom, false) => Err(CoreError::InvalidEvent(
                "eventName is required for custom events".to_string(),
            )),
            (EventKind::Custom, true) => Ok(()),
            (_, true) => Err(CoreError::InvalidEvent(
                "eventName is only allowed for custom events".to_string(),
            )),
            (_, false) => Ok(()),
        }
    }
}

/// GeoIP lookup result. Every field degrades to `None` when unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// The stored version of an event. Mirrors the `events` table columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by the store on insert; ignored by `insert_event`.
    pub id: i64,
    pub project_id: String,
    pub kind: EventKind,
    pub event_name: Option<String>,
    /// Serialized JSON object.
    pub properties: Option<String>,
    pub path: String,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub session_id: String,
    pub visitor_hash: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub scroll_depth: Option<i32>,
    pub target_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// A bare event with every optional field empty. Used by the enrichment
    /// layer and by test fixtures.
    pub fn new(
        project_id: &str,
        kind: EventKind,
        path: &str,
        session_id: &str,
        visitor_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            project_id: project_id.to_string(),
            kind,
            event_name: None,
            properties: None,
            path: path.to_string(),
            referrer: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            session_id: session_id.to_string(),
            visitor_hash: visitor_hash.to_string(),
            browser: None,
            os: None,
            device: None,
            country: None,
            city: None,
            region: None,
            latitude: None,
            longitude: None,
            scroll_depth: None,
            target_url: None,
            created_at,
        }
    }
}
