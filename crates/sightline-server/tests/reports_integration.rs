use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sightline_core::config::{Config, PrivacyMode};
use sightline_core::event::{Event, EventKind};
use sightline_duckdb::DuckDbBackend;
use sightline_metadata::{CreateFunnelStepParams, CreateProjectParams, MetadataStore, Project};
use sightline_server::app::build_app;
use sightline_server::geo::NullGeoResolver;
use sightline_server::state::AppState;

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/sightline-test".to_string(),
        duckdb_memory_limit: "1GB".to_string(),
        geoip_path: "/nonexistent/GeoLite2-City.mmdb".to_string(),
        salt: "integration-test-salt-0123456789abcdef".to_string(),
        rotation_hours: 24,
        privacy_mode: PrivacyMode::Standard,
        heartbeat_interval_seconds: 15,
        rate_limit_ip_per_minute: 100,
        rate_limit_api_key_per_minute: 1000,
        retention_days: 365,
        webhook_workers: 1,
        webhook_queue_size: 16,
        cors_origins: vec![],
        smtp: None,
        email_report_interval_hours: 24,
    }
}

/// Two sessions an hour ago: `s1` visits the pricing page, signs up and
/// buys; `s2` only sees the home page.
async fn seed(state: &AppState, project: &Project) -> DateTime<Utc> {
    let base = Utc::now() - Duration::hours(1);
    let mut events = vec![
        Event::new(&project.id, EventKind::Pageview, "/", "s1", "v1", base),
        Event::new(
            &project.id,
            EventKind::Pageview,
            "/pricing",
            "s1",
            "v1",
            base + Duration::seconds(10),
        ),
        Event::new(&project.id, EventKind::Pageview, "/", "s2", "v2", base),
    ];
    let mut signup = Event::new(
        &project.id,
        EventKind::Custom,
        "/pricing",
        "s1",
        "v1",
        base + Duration::seconds(30),
    );
    signup.event_name = Some("signup".to_string());
    events.push(signup);
    let mut purchase = Event::new(
        &project.id,
        EventKind::Custom,
        "/checkout",
        "s1",
        "v1",
        base + Duration::seconds(60),
    );
    purchase.event_name = Some("purchase".to_string());
    purchase.properties = Some(r#"{"revenue":20.5}"#.to_string());
    purchase.referrer = Some("https://news.ycombinator.com/item?id=1".to_string());
    events.push(purchase);

    for event in &events {
        state.analytics.insert_event(event).await.expect("insert");
    }
    base
}

async fn setup() -> (Arc<AppState>, axum::Router, Project) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory DuckDB");
    let project = db
        .create_project(CreateProjectParams {
            name: "Shop".to_string(),
            domain: "shop.example.com".to_string(),
            report_email: None,
        })
        .await
        .expect("create project");
    let state =
        Arc::new(AppState::new(db, test_config(), Arc::new(NullGeoResolver)).expect("state"));
    seed(&state, &project).await;
    let app = build_app(Arc::clone(&state));
    (state, app, project)
}

async fn get(app: &axum::Router, uri: &str, api_key: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::empty()).expect("build request"))
        .await
        .expect("request");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

#[tokio::test]
async fn test_report_summarises_seeded_events() {
    let (_state, app, project) = setup().await;
    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/report", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["project_id"], project.id.as_str());
    assert_eq!(body["total_events"], 5);
    assert_eq!(body["pageviews"], 3);
    assert_eq!(body["unique_visitors"], 2);
    assert_eq!(body["sessions"]["total_sessions"], 2);
    assert_eq!(body["conversion_rate"], 50.0);
    assert_eq!(body["top_pages"][0]["label"], "/");
    assert_eq!(body["top_pages"][0]["count"], 2);
    assert_eq!(body["referrers"][0]["label"], "news.ycombinator.com");
}

#[tokio::test]
async fn test_report_accepts_key_as_query_parameter() {
    let (_state, app, project) = setup().await;
    let (status, _) = get(
        &app,
        &format!(
            "/api/projects/{}/report?api_key={}",
            project.id, project.api_key
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_report_outside_range_is_empty() {
    let (_state, app, project) = setup().await;
    let start = (Utc::now() - Duration::days(30)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let end = (Utc::now() - Duration::days(20)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/report?start={start}&end={end}", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_events"], 0);
    assert_eq!(body["bounce_rate"], 0.0);
}

#[tokio::test]
async fn test_unknown_project_and_wrong_key() {
    let (_state, app, project) = setup().await;

    let (status, body) = get(&app, "/api/projects/missing/report", Some(&project.api_key)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = get(
        &app,
        &format!("/api/projects/{}/report", project.id),
        Some("sl_wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(&app, &format!("/api/projects/{}/report", project.id), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_timeseries_filters() {
    let (_state, app, project) = setup().await;

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/timeseries?filter=24h", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let total: i64 = body
        .as_array()
        .expect("points")
        .iter()
        .filter_map(|point| point["views"].as_i64())
        .sum();
    // Pageviews only; the two custom events are not views.
    assert_eq!(total, 3);

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/timeseries?filter=90d", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_calendar_covers_a_year() {
    let (_state, app, project) = setup().await;
    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/calendar", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let days = body.as_array().expect("days");
    assert!(days.len() >= 365);
    let visits: i64 = days.iter().filter_map(|d| d["visits"].as_i64()).sum();
    assert!(visits > 0);
}

#[tokio::test]
async fn test_goal_conversions_by_session() {
    let (_state, app, project) = setup().await;
    let (status, body) = get(
        &app,
        &format!(
            "/api/projects/{}/goals/conversions?goal_type=event&match_value=signup",
            project.id
        ),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversions"], 1);
    assert_eq!(body["conversion_rate"], 50.0);

    let (status, body) = get(
        &app,
        &format!(
            "/api/projects/{}/goals/conversions?goal_type=url&match_value=/",
            project.id
        ),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversions"], 2);
    assert_eq!(body["conversion_rate"], 100.0);
}

#[tokio::test]
async fn test_funnel_analysis_and_missing_funnel() {
    let (state, app, project) = setup().await;
    let funnel = state
        .metadata
        .create_funnel(
            &project.id,
            "Signup",
            vec![
                CreateFunnelStepParams {
                    step_type: "url".to_string(),
                    match_value: "/".to_string(),
                    label: Some("Home".to_string()),
                },
                CreateFunnelStepParams {
                    step_type: "url".to_string(),
                    match_value: "/pricing".to_string(),
                    label: None,
                },
                CreateFunnelStepParams {
                    step_type: "event".to_string(),
                    match_value: "signup".to_string(),
                    label: None,
                },
            ],
        )
        .await
        .expect("create funnel");

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/funnels/{}", project.id, funnel.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_sessions"], 2);
    let reached: Vec<i64> = body["steps"]
        .as_array()
        .expect("steps")
        .iter()
        .filter_map(|s| s["sessions"].as_i64())
        .collect();
    assert_eq!(reached, vec![2, 1, 1]);
    assert_eq!(body["steps"][0]["label"], "Home");

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/funnels/nope", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_revenue_endpoints() {
    let (_state, app, project) = setup().await;

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/revenue", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"]["total_revenue"], 20.5);
    assert_eq!(body["current"]["transactions"], 1);
    assert_eq!(body["previous"]["total_revenue"], 0.0);
    assert!(body["revenue_change"].is_null());

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/revenue/events", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["event_name"], "purchase");

    let (status, body) = get(
        &app,
        &format!("/api/projects/{}/revenue/sources", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().expect("sources").len(), 1);
}

#[tokio::test]
async fn test_inverted_range_is_rejected() {
    let (_state, app, project) = setup().await;
    let start = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let end = (Utc::now() - Duration::days(1)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let (status, _) = get(
        &app,
        &format!("/api/projects/{}/revenue?start={start}&end={end}", project.id),
        Some(&project.api_key),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
