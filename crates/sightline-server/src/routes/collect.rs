use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use sightline_core::admission::RateLimitOutcome;
use sightline_core::event::{CollectPayload, Event, EventKind};

use crate::geo::redact;
use crate::webhook::DetectedEvent;
use crate::{error::AppError, state::AppState};

/// Largest accepted collect body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Default, Deserialize)]
struct CollectQuery {
    api_key: Option<String>,
}

/// `POST /api/collect`: ingest one tracker beacon.
///
/// ## Pipeline
/// 1. Admission: per-IP then per-API-key token buckets (429 on rejection).
/// 2. Project lookup by API key (401 when unknown).
/// 3. Payload validation (400).
/// 4. Enrichment: rotating visitor hash, GeoIP and User-Agent details, each
///    filtered by the configured privacy mode.
/// 5. Insert, then the goal/spike detector.
///
/// ## Response
/// `202 Accepted` with `{ "ok": true }`.
#[tracing::instrument(skip_all)]
pub async fn collect(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<impl IntoResponse, AppError> {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_ip = extract_client_ip(&parts.headers, peer);
    let query = Query::<CollectQuery>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let api_key = extract_api_key(&parts.headers, query.api_key).ok_or(AppError::Unauthorized)?;

    if let RateLimitOutcome::Exceeded {
        kind,
        identifier,
        limit,
        window,
    } = state.admission.check_admission(&client_ip, &api_key)
    {
        tracing::debug!(?kind, %identifier, limit, "Collect request rejected by admission control");
        return Err(AppError::RateLimited {
            kind,
            limit,
            window,
        });
    }

    let project = state
        .metadata
        .find_project_by_api_key(&api_key)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::PayloadTooLarge)?;
    let payload: CollectPayload = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::BadRequest(format!("invalid payload: {e}")))?;
    payload.validate()?;

    let user_agent = parts
        .headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let event = enrich(&state, &project.id, payload, &client_ip, user_agent, Utc::now()).await;
    state.analytics.insert_event(&event).await?;

    state
        .detector
        .on_event(DetectedEvent {
            project_id: &event.project_id,
            kind: event.kind,
            event_name: event.event_name.as_deref(),
            path: &event.path,
        })
        .await;

    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

/// Turn a validated payload into the stored event. Raw IP and User-Agent are
/// only used here and never copied into the result.
pub async fn enrich(
    state: &AppState,
    project_id: &str,
    payload: CollectPayload,
    client_ip: &str,
    user_agent: &str,
    now: DateTime<Utc>,
) -> Event {
    let config = state.config();
    let mode = config.privacy_mode;
    let visitor_hash = state.hasher.hash_at(client_ip, user_agent, project_id, now);

    let mut event = Event::new(
        project_id,
        payload.event_type,
        &payload.path,
        &payload.session_id,
        &visitor_hash,
        now,
    );
    if payload.event_type == EventKind::Custom {
        event.event_name = payload.event_name.map(|name| name.trim().to_string());
    }
    event.properties = payload
        .properties
        .filter(|value| !value.is_null())
        .map(|value| value.to_string());
    event.referrer = non_empty(payload.referrer);
    event.utm_source = non_empty(payload.utm_source);
    event.utm_medium = non_empty(payload.utm_medium);
    event.utm_campaign = non_empty(payload.utm_campaign);
    event.scroll_depth = payload.scroll_depth.map(|depth| depth.clamp(0, 100));
    event.target_url = non_empty(payload.target_url);

    if mode.allows_client_details() {
        let parsed = parse_user_agent(user_agent);
        event.browser =
            non_empty(payload.browser).or_else(|| parsed.as_ref().map(|u| u.browser.clone()));
        event.os = non_empty(payload.os).or_else(|| parsed.as_ref().map(|u| u.os.clone()));
        event.device =
            non_empty(payload.device).or_else(|| parsed.as_ref().map(|u| u.device_type.clone()));
    }

    if mode.allows_geolocation() {
        let location = redact(state.geo.lookup(client_ip).await, mode);
        event.country = location.country;
        event.region = location.region;
        event.city = location.city;
        event.latitude = location.latitude;
        event.longitude = location.longitude;
    }

    event
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Extract the real client IP from `X-Forwarded-For` (first entry), falling
/// back to the socket peer address, then `"unknown"`.
fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// The `X-Api-Key` header wins over the `api_key` query parameter.
pub(crate) fn extract_api_key(headers: &HeaderMap, from_query: Option<String>) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(from_query)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Parsed User-Agent fields.
#[derive(Debug)]
struct UaInfo {
    browser: String,
    os: String,
    device_type: String,
}

/// Parse a `User-Agent` string via the `woothee` crate.
///
/// Returns `None` if the UA string is empty or `woothee` cannot classify it.
fn parse_user_agent(user_agent: &str) -> Option<UaInfo> {
    if user_agent.is_empty() {
        return None;
    }

    let result = woothee::parser::Parser::new().parse(user_agent)?;

    // woothee categories: smartphone/mobilephone → mobile, tablet → tablet,
    // everything else → desktop.
    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    }
    .to_string();

    Some(UaInfo {
        browser: result.name.to_string(),
        os: result.os.to_string(),
        device_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().expect("header value"));
        }
        map
    }

    #[test]
    fn client_ip_prefers_first_forwarded_entry() {
        let h = headers(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(extract_client_ip(&h, None), "203.0.113.9");
    }

    #[test]
    fn client_ip_falls_back_to_peer_then_unknown() {
        let peer: SocketAddr = "192.0.2.4:5555".parse().expect("addr");
        assert_eq!(extract_client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.4");
        assert_eq!(extract_client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn api_key_header_wins_over_query() {
        let h = headers(&[("x-api-key", "sl_header")]);
        assert_eq!(
            extract_api_key(&h, Some("sl_query".to_string())).as_deref(),
            Some("sl_header")
        );
        assert_eq!(
            extract_api_key(&HeaderMap::new(), Some(" sl_query ".to_string())).as_deref(),
            Some("sl_query")
        );
        assert_eq!(extract_api_key(&HeaderMap::new(), Some(String::new())), None);
    }

    #[test]
    fn user_agent_classifies_device() {
        let iphone = concat!(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 ",
            "(KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1"
        );
        let parsed = parse_user_agent(iphone).expect("classified");
        assert_eq!(parsed.device_type, "mobile");
        assert_eq!(parsed.browser, "Safari");

        let desktop = concat!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
            "(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        );
        let parsed = parse_user_agent(desktop).expect("classified");
        assert_eq!(parsed.device_type, "desktop");
        assert_eq!(parsed.browser, "Chrome");

        assert!(parse_user_agent("").is_none());
    }
}
