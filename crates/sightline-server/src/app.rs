use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `CorsLayer`: the tracker posts from third-party origins. An empty
///    `SIGHTLINE_CORS_ORIGINS` allows any origin.
/// 2. `TraceLayer`: structured request/response logging via `tracing`.
/// 3. `CompressionLayer`: gzip for report responses.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config().cors_origins);

    let reports = Router::new()
        .route("/{id}/report", get(routes::reports::report))
        .route("/{id}/timeseries", get(routes::reports::timeseries))
        .route("/{id}/calendar", get(routes::reports::calendar))
        .route("/{id}/funnels/{funnel_id}", get(routes::reports::funnel))
        .route(
            "/{id}/goals/conversions",
            get(routes::reports::goal_conversions),
        )
        .route("/{id}/revenue", get(routes::reports::revenue))
        .route("/{id}/revenue/events", get(routes::reports::revenue_by_event))
        .route(
            "/{id}/revenue/sources",
            get(routes::reports::revenue_by_source),
        )
        .layer(CompressionLayer::new());

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/collect", post(routes::collect::collect))
        .nest("/api/projects", reports)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}
