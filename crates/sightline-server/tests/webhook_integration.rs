use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;

use sightline_core::config::{Config, PrivacyMode};
use sightline_core::event::EventKind;
use sightline_duckdb::DuckDbBackend;
use sightline_metadata::{
    CreateGoalParams, CreateProjectParams, CreateWebhookParams, MetadataStore, Project,
    WebhookDeliveryRecord, WebhookEvent,
};
use sightline_server::app::build_app;
use sightline_server::geo::NullGeoResolver;
use sightline_server::state::AppState;
use sightline_server::webhook::{sign_payload, DetectedEvent, DispatchSettings};

const SECRET: &str = "whsec_integration";

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
        rate_limit_ip_per_minute: 1000,
        rate_limit_api_key_per_minute: 10_000,
        retention_days: 365,
        webhook_workers: 2,
        webhook_queue_size: 64,
        cors_origins: vec![],
        smtp: None,
        email_report_interval_hours: 24,
    }
}

#[derive(Clone)]
struct Receiver {
    status: StatusCode,
    hits: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
}

async fn receive(State(rx): State<Receiver>, headers: HeaderMap, body: Bytes) -> StatusCode {
    rx.hits.lock().await.push((headers, body));
    rx.status
}

/// Local HTTP endpoint answering every POST with `status`. Returns its URL
/// and the captured requests.
async fn spawn_receiver(status: StatusCode) -> (String, Arc<Mutex<Vec<(HeaderMap, Bytes)>>>) {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route("/hook", post(receive)).with_state(Receiver {
        status,
        hits: Arc::clone(&hits),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind receiver");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("receiver");
    });
    (format!("http://{addr}/hook"), hits)
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
    let settings = DispatchSettings {
        workers: 2,
        queue_size: 64,
        timeout: Duration::from_secs(5),
        backoff_step: Duration::from_millis(10),
    };
    let state = Arc::new(
        AppState::with_dispatch(db, test_config(), Arc::new(NullGeoResolver), settings)
            .expect("state"),
    );
    let app = build_app(Arc::clone(&state));
    (state, app, project)
}

async fn register_webhook(
    state: &AppState,
    project: &Project,
    url: &str,
    events: Vec<WebhookEvent>,
) -> String {
    state
        .metadata
        .create_webhook(CreateWebhookParams {
            project_id: project.id.clone(),
            url: url.to_string(),
            secret: SECRET.to_string(),
            events,
        })
        .await
        .expect("create webhook")
        .id
}

/// Poll the audit log until `expected` rows exist or two seconds pass.
async fn wait_for_deliveries(
    state: &AppState,
    webhook_id: &str,
    expected: usize,
) -> Vec<WebhookDeliveryRecord> {
    for _ in 0..100 {
        let rows = state
            .metadata
            .list_webhook_deliveries(webhook_id)
            .await
            .expect("list deliveries");
        if rows.len() >= expected {
            return rows;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    state
        .metadata
        .list_webhook_deliveries(webhook_id)
        .await
        .expect("list deliveries")
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_goal_conversion_delivers_signed_webhook() {
    let (state, app, project) = setup().await;
    let (url, hits) = spawn_receiver(StatusCode::OK).await;
    let webhook_id =
        register_webhook(&state, &project, &url, vec![WebhookEvent::GoalConversion]).await;
    state
        .metadata
        .create_goal(CreateGoalParams {
            project_id: project.id.clone(),
            name: "Reached pricing".to_string(),
            goal_type: "url".to_string(),
            match_value: "/pricing".to_string(),
        })
        .await
        .expect("create goal");

    for path in ["/", "/pricing"] {
        let request = Request::builder()
            .method("POST")
            .uri("/api/collect")
            .header("content-type", "application/json")
            .header("x-api-key", &project.api_key)
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::from(
                json!({ "path": path, "sessionId": "s1", "type": "pageview" }).to_string(),
            ))
            .expect("build request");
        let response = app.clone().oneshot(request).await.expect("request");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let rows = wait_for_deliveries(&state, &webhook_id, 1).await;
    assert_eq!(rows.len(), 1);
    assert!(rows[0].delivery.success);
    assert_eq!(rows[0].delivery.attempt, 1);
    assert_eq!(rows[0].delivery.response_code, Some(200));

    let hits = hits.lock().await;
    assert_eq!(hits.len(), 1);
    let (headers, body) = &hits[0];
    assert_eq!(header(headers, "x-sightline-event"), Some("goal_conversion"));
    let expected = format!("sha256={}", sign_payload(SECRET, body).expect("sign"));
    assert_eq!(header(headers, "x-sightline-signature"), Some(expected.as_str()));

    let payload: Value = serde_json::from_slice(body).expect("json payload");
    assert_eq!(payload["event"], "goal_conversion");
    assert_eq!(payload["data"]["goal_name"], "Reached pricing");
    assert_eq!(payload["data"]["goal_type"], "url");
    assert_eq!(payload["data"]["path"], "/pricing");
    assert_eq!(payload["data"]["project_id"], json!(project.id));
}

#[tokio::test]
async fn test_event_goal_ignores_pageviews_with_matching_path() {
    let (state, _app, project) = setup().await;
    let (url, hits) = spawn_receiver(StatusCode::OK).await;
    register_webhook(&state, &project, &url, vec![WebhookEvent::GoalConversion]).await;
    state
        .metadata
        .create_goal(CreateGoalParams {
            project_id: project.id.clone(),
            name: "Signup".to_string(),
            goal_type: "event".to_string(),
            match_value: "signup".to_string(),
        })
        .await
        .expect("create goal");

    let pageview = DetectedEvent {
        project_id: &project.id,
        kind: EventKind::Pageview,
        event_name: None,
        path: "signup",
    };
    assert_eq!(state.detector.on_event(pageview).await, 0);

    let custom = DetectedEvent {
        project_id: &project.id,
        kind: EventKind::Custom,
        event_name: Some("signup"),
        path: "/register",
    };
    assert_eq!(state.detector.on_event(custom).await, 1);

    for _ in 0..100 {
        if !hits.lock().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let hits = hits.lock().await;
    assert_eq!(hits.len(), 1);
    let payload: Value = serde_json::from_slice(&hits[0].1).expect("json payload");
    assert_eq!(payload["data"]["event_name"], "signup");
}

#[tokio::test]
async fn test_traffic_spike_fires_exactly_once() {
    let (state, _app, project) = setup().await;
    let (url, hits) = spawn_receiver(StatusCode::OK).await;
    let webhook_id =
        register_webhook(&state, &project, &url, vec![WebhookEvent::TrafficSpike]).await;

    let event = DetectedEvent {
        project_id: &project.id,
        kind: EventKind::Pageview,
        event_name: None,
        path: "/",
    };
    let t = Instant::now();
    let at = |secs: u64| t + Duration::from_secs(secs);

    let mut queued = 0;
    // Baseline of 11 events per minute.
    for i in 0..10 {
        queued += state.detector.on_event_at(event, at(i * 6)).await;
    }
    queued += state.detector.on_event_at(event, at(60)).await;
    assert_eq!(queued, 0);

    // 26 events in the next minute.
    for i in 1..=25 {
        queued += state.detector.on_event_at(event, at(60 + i * 2)).await;
    }
    queued += state.detector.on_event_at(event, at(120)).await;
    assert_eq!(queued, 1);

    let rows = wait_for_deliveries(&state, &webhook_id, 1).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery.event_type, WebhookEvent::TrafficSpike);

    let hits = hits.lock().await;
    assert_eq!(hits.len(), 1);
    assert_eq!(header(&hits[0].0, "x-sightline-event"), Some("traffic_spike"));
    let payload: Value = serde_json::from_slice(&hits[0].1).expect("json payload");
    assert_eq!(payload["data"]["event_count"], 26);
    assert_eq!(payload["data"]["baseline_rate"], 11.0);
}

#[tokio::test]
async fn test_failing_receiver_is_retried_three_times() {
    let (state, _app, project) = setup().await;
    let (url, hits) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let webhook_id =
        register_webhook(&state, &project, &url, vec![WebhookEvent::GoalConversion]).await;
    state
        .metadata
        .create_goal(CreateGoalParams {
            project_id: project.id.clone(),
            name: "Checkout".to_string(),
            goal_type: "url".to_string(),
            match_value: "/checkout".to_string(),
        })
        .await
        .expect("create goal");

    let event = DetectedEvent {
        project_id: &project.id,
        kind: EventKind::Pageview,
        event_name: None,
        path: "/checkout",
    };
    assert_eq!(state.detector.on_event(event).await, 1);

    let mut rows = wait_for_deliveries(&state, &webhook_id, 3).await;
    rows.sort_by_key(|row| row.delivery.attempt);
    let attempts: Vec<u32> = rows.iter().map(|row| row.delivery.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(rows.iter().all(|row| !row.delivery.success));
    assert!(rows
        .iter()
        .all(|row| row.delivery.response_code == Some(500)));

    // No fourth attempt.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.lock().await.len(), 3);
}

#[tokio::test]
async fn test_webhook_without_subscription_receives_nothing() {
    let (state, _app, project) = setup().await;
    let (url, hits) = spawn_receiver(StatusCode::OK).await;
    register_webhook(&state, &project, &url, vec![WebhookEvent::TrafficSpike]).await;
    state
        .metadata
        .create_goal(CreateGoalParams {
            project_id: project.id.clone(),
            name: "Any".to_string(),
            goal_type: "url".to_string(),
            match_value: "/".to_string(),
        })
        .await
        .expect("create goal");

    let event = DetectedEvent {
        project_id: &project.id,
        kind: EventKind::Pageview,
        event_name: None,
        path: "/",
    };
    assert_eq!(state.detector.on_event(event).await, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(hits.lock().await.is_empty());
}
