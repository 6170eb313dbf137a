use async_trait::async_trait;

use sightline_core::analytics::{Funnel, FunnelStep, Goal};
use sightline_metadata::{
    CreateFunnelStepParams, CreateGoalParams, CreateProjectParams, CreateWebhookParams,
    MetadataStore, Project, Webhook, WebhookDelivery, WebhookDeliveryRecord,
};

use crate::queries::{funnels, goals, projects, webhooks};
use crate::DuckDbBackend;

#[async_trait]
impl MetadataStore for DuckDbBackend {
    async fn create_project(&self, params: CreateProjectParams) -> anyhow::Result<Project> {
        projects::create_project_inner(self, params).await
    }

    async fn get_project(&self, id: &str) -> anyhow::Result<Option<Project>> {
        projects::get_project_inner(self, id).await
    }

    async fn find_project_by_api_key(&self, api_key: &str) -> anyhow::Result<Option<Project>> {
        projects::find_project_by_api_key_inner(self, api_key).await
    }

    async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        projects::list_projects_inner(self).await
    }

    async fn create_goal(&self, params: CreateGoalParams) -> anyhow::Result<Goal> {
        goals::create_goal_inner(self, params).await
    }

    async fn list_active_goals(&self, project_id: &str) -> anyhow::Result<Vec<Goal>> {
        goals::list_active_goals_inner(self, project_id).await
    }

    async fn create_funnel(
        &self,
        project_id: &str,
        name: &str,
        steps: Vec<CreateFunnelStepParams>,
    ) -> anyhow::Result<Funnel> {
        funnels::create_funnel_inner(self, project_id, name, steps).await
    }

    async fn get_funnel_steps(&self, funnel_id: &str) -> anyhow::Result<Vec<FunnelStep>> {
        funnels::get_funnel_steps_inner(self, funnel_id).await
    }

    async fn create_webhook(&self, params: CreateWebhookParams) -> anyhow::Result<Webhook> {
        webhooks::create_webhook_inner(self, params).await
    }

    async fn list_active_webhooks(&self, project_id: &str) -> anyhow::Result<Vec<Webhook>> {
        webhooks::list_active_webhooks_inner(self, project_id).await
    }

    async fn record_webhook_delivery(&self, delivery: WebhookDelivery) -> anyhow::Result<()> {
        webhooks::record_webhook_delivery_inner(self, delivery).await
    }

    async fn list_webhook_deliveries(
        &self,
        webhook_id: &str,
    ) -> anyhow::Result<Vec<WebhookDeliveryRecord>> {
        webhooks::list_webhook_deliveries_inner(self, webhook_id).await
    }
}
