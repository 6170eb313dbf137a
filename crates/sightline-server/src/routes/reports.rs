//! Read-only report endpoints under `/api/projects/{id}`.
//!
//! Every route requires the project's API key (`X-Api-Key` header or
//! `api_key` query parameter). The time range comes from the optional
//! RFC 3339 `start` / `end` query parameters and defaults to the last seven
//! days.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use sightline_core::timeseries::TimeFilter;
use sightline_metadata::Project;

use crate::routes::collect::extract_api_key;
use crate::{error::AppError, state::AppState};

const DEFAULT_RANGE_DAYS: i64 = 7;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub api_key: Option<String>,
}

impl RangeQuery {
    fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
        let end = self.end.unwrap_or(now);
        let start = self
            .start
            .unwrap_or(end - Duration::days(DEFAULT_RANGE_DAYS));
        if start > end {
            return Err(AppError::BadRequest("start must not be after end".to_string()));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeSeriesQuery {
    pub filter: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GoalQuery {
    pub goal_type: String,
    pub match_value: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub api_key: Option<String>,
}

/// Load the project and check the caller holds its API key.
async fn authorized_project(
    state: &AppState,
    project_id: &str,
    headers: &HeaderMap,
    query_key: Option<String>,
) -> Result<Project, AppError> {
    let project = state
        .metadata
        .get_project(project_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("project {project_id} not found")))?;
    match extract_api_key(headers, query_key) {
        Some(key) if key == project.api_key => Ok(project),
        _ => Err(AppError::Unauthorized),
    }
}

/// `GET /api/projects/{id}/report`
#[tracing::instrument(skip(state, headers, query))]
pub async fn report(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key.clone()).await?;
    let (start, end) = query.resolve(Utc::now())?;
    let heartbeat = state.config().heartbeat_interval_seconds;
    let report = state
        .analytics
        .generate_report(&project_id, start, end, heartbeat)
        .await?;
    Ok(Json(report))
}

/// `GET /api/projects/{id}/timeseries?filter=24h|3d|7d|30d|365d`
#[tracing::instrument(skip(state, headers, query))]
pub async fn timeseries(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TimeSeriesQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key).await?;
    let filter = TimeFilter::from_str(query.filter.as_deref().unwrap_or("7d"))?;
    let (start, end) = filter.range_ending(Utc::now());
    let points = state
        .analytics
        .generate_time_series(&project_id, start, end, filter)
        .await?;
    Ok(Json(points))
}

/// `GET /api/projects/{id}/calendar`
#[tracing::instrument(skip(state, headers, query))]
pub async fn calendar(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key).await?;
    let today = Utc::now().date_naive();
    let days = state
        .analytics
        .contribution_calendar(&project_id, today)
        .await?;
    Ok(Json(days))
}

/// `GET /api/projects/{id}/funnels/{funnel_id}`
#[tracing::instrument(skip(state, headers, query))]
pub async fn funnel(
    State(state): State<Arc<AppState>>,
    Path((project_id, funnel_id)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key.clone()).await?;
    let (start, end) = query.resolve(Utc::now())?;
    let analysis = state
        .analytics
        .analyze_funnel(&funnel_id, &project_id, start, end)
        .await?;
    Ok(Json(analysis))
}

/// `GET /api/projects/{id}/goals/conversions?goal_type=url&match_value=/done`
#[tracing::instrument(skip(state, headers, query))]
pub async fn goal_conversions(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<GoalQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key.clone()).await?;
    let range = RangeQuery {
        start: query.start,
        end: query.end,
        api_key: None,
    };
    let (start, end) = range.resolve(Utc::now())?;
    let result = state
        .analytics
        .calculate_goal_conversions(&query.goal_type, &query.match_value, &project_id, start, end)
        .await?;
    Ok(Json(result))
}

/// `GET /api/projects/{id}/revenue`
#[tracing::instrument(skip(state, headers, query))]
pub async fn revenue(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key.clone()).await?;
    let (start, end) = query.resolve(Utc::now())?;
    let summary = state.analytics.revenue_summary(&project_id, start, end).await?;
    Ok(Json(summary))
}

/// `GET /api/projects/{id}/revenue/events`
#[tracing::instrument(skip(state, headers, query))]
pub async fn revenue_by_event(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key.clone()).await?;
    let (start, end) = query.resolve(Utc::now())?;
    let rows = state
        .analytics
        .revenue_by_event(&project_id, start, end)
        .await?;
    Ok(Json(rows))
}

/// `GET /api/projects/{id}/revenue/sources`
#[tracing::instrument(skip(state, headers, query))]
pub async fn revenue_by_source(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    authorized_project(&state, &project_id, &headers, query.api_key.clone()).await?;
    let (start, end) = query.resolve(Utc::now())?;
    let rows = state
        .analytics
        .revenue_by_source(&project_id, start, end)
        .await?;
    Ok(Json(rows))
}
