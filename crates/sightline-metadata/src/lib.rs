use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sightline_core::analytics::{Funnel, FunnelStep, Goal};

/// Longest response body kept in a delivery audit row.
pub const MAX_AUDIT_BODY_LEN: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub api_key: String,
    /// Recipient of the periodic email report, if any.
    pub report_email: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateProjectParams {
    pub name: String,
    pub domain: String,
    pub report_email: Option<String>,
}

/// Events a webhook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    GoalConversion,
    TrafficSpike,
}

impl WebhookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoalConversion => "goal_conversion",
            Self::TrafficSpike => "traffic_spike",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "goal_conversion" => Some(Self::GoalConversion),
            "traffic_spike" => Some(Self::TrafficSpike),
            _ => None,
        }
    }

    /// Parse a comma-separated subscription list, skipping unknown names.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',').filter_map(Self::parse).collect()
    }

    pub fn join(events: &[Self]) -> String {
        events
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: String,
    pub project_id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub events: Vec<WebhookEvent>,
    pub active: bool,
}

impl Webhook {
    pub fn subscribes_to(&self, event: WebhookEvent) -> bool {
        self.active && self.events.contains(&event)
    }
}

#[derive(Debug, Clone)]
pub struct CreateWebhookParams {
    pub project_id: String,
    pub url: String,
    pub secret: String,
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone)]
pub struct CreateGoalParams {
    pub project_id: String,
    pub name: String,
    pub goal_type: String,
    pub match_value: String,
}

#[derive(Debug, Clone)]
pub struct CreateFunnelStepParams {
    pub step_type: String,
    pub match_value: String,
    pub label: Option<String>,
}

/// One audit row per delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDelivery {
    pub webhook_id: String,
    pub event_type: WebhookEvent,
    /// 1-based.
    pub attempt: u32,
    pub response_code: Option<u16>,
    pub response_body: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl WebhookDelivery {
    /// Cut the stored body to [`MAX_AUDIT_BODY_LEN`] bytes on a char boundary.
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_AUDIT_BODY_LEN {
            return body.to_string();
        }
        let mut end = MAX_AUDIT_BODY_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookDeliveryRecord {
    pub id: String,
    #[serde(flatten)]
    pub delivery: WebhookDelivery,
    pub created_at: String,
}

/// Storage interface for configuration entities consumed by ingestion and
/// reporting. Projects, goals, funnels and webhooks are read-only here apart
/// from the fixture constructors; delivery audit rows are append-only.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn create_project(&self, params: CreateProjectParams) -> anyhow::Result<Project>;
    async fn get_project(&self, id: &str) -> anyhow::Result<Option<Project>>;
    async fn find_project_by_api_key(&self, api_key: &str) -> anyhow::Result<Option<Project>>;
    async fn list_projects(&self) -> anyhow::Result<Vec<Project>>;

    async fn create_goal(&self, params: CreateGoalParams) -> anyhow::Result<Goal>;
    async fn list_active_goals(&self, project_id: &str) -> anyhow::Result<Vec<Goal>>;

    async fn create_funnel(
        &self,
        project_id: &str,
        name: &str,
        steps: Vec<CreateFunnelStepParams>,
    ) -> anyhow::Result<Funnel>;
    /// Steps ordered by ascending `step_number`.
    async fn get_funnel_steps(&self, funnel_id: &str) -> anyhow::Result<Vec<FunnelStep>>;

    async fn create_webhook(&self, params: CreateWebhookParams) -> anyhow::Result<Webhook>;
    async fn list_active_webhooks(&self, project_id: &str) -> anyhow::Result<Vec<Webhook>>;

    async fn record_webhook_delivery(&self, delivery: WebhookDelivery) -> anyhow::Result<()>;
    async fn list_webhook_deliveries(
        &self,
        webhook_id: &str,
    ) -> anyhow::Result<Vec<WebhookDeliveryRecord>>;
}
