use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sightline_core::analytics::{AnalyticsBackend, Funnel, GroupCount, GroupKey};
use sightline_core::event::Event;

use crate::queries::{events, funnels};
use crate::DuckDbBackend;

/// Storage primitives only; report operations use the trait's provided
/// methods over `select_range` and `group_count`.
#[async_trait]
impl AnalyticsBackend for DuckDbBackend {
    async fn insert_event(&self, event: &Event) -> anyhow::Result<i64> {
        events::insert_event_inner(self, event).await
    }

    async fn select_range(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Event>> {
        events::select_range_inner(self, project_id, start, end).await
    }

    async fn group_count(
        &self,
        project_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        key: GroupKey,
    ) -> anyhow::Result<Vec<GroupCount>> {
        events::group_count_inner(self, project_id, start, end, key).await
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        events::delete_events_before_inner(self, cutoff).await
    }

    async fn delete_project_events(&self, project_id: &str) -> anyhow::Result<u64> {
        events::delete_project_events_inner(self, project_id).await
    }

    async fn get_funnel(
        &self,
        project_id: &str,
        funnel_id: &str,
    ) -> anyhow::Result<Option<Funnel>> {
        funnels::get_funnel_inner(self, project_id, funnel_id).await
    }
}
