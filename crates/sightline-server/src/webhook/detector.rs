//! Per-event goal-conversion and traffic-spike checks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use sightline_core::analytics::{Goal, GoalType};
use sightline_core::cache::{Expiry, TtlCache};
use sightline_core::event::EventKind;
use sightline_core::spike::{SpikeDetector, TrafficSpike};
use sightline_metadata::{MetadataStore, Webhook, WebhookEvent};

use super::dispatcher::{DeliveryJob, WebhookDispatcher};

const CONFIG_TTL: Duration = Duration::from_secs(60);
const CONFIG_CACHE_CAPACITY: usize = 10_000;

/// The fields of a stored event the detector looks at.
#[derive(Debug, Clone, Copy)]
pub struct DetectedEvent<'a> {
    pub project_id: &'a str,
    pub kind: EventKind,
    pub event_name: Option<&'a str>,
    pub path: &'a str,
}

pub struct EventDetector {
    metadata: Arc<dyn MetadataStore>,
    webhooks: TtlCache<String, Arc<Vec<Webhook>>>,
    goals: TtlCache<String, Arc<Vec<Goal>>>,
    spikes: SpikeDetector,
    dispatcher: WebhookDispatcher,
}

impl EventDetector {
    pub fn new(metadata: Arc<dyn MetadataStore>, dispatcher: WebhookDispatcher) -> Self {
        Self {
            metadata,
            webhooks: TtlCache::new(Expiry::AfterWrite(CONFIG_TTL), CONFIG_CACHE_CAPACITY),
            goals: TtlCache::new(Expiry::AfterWrite(CONFIG_TTL), CONFIG_CACHE_CAPACITY),
            spikes: SpikeDetector::new(),
            dispatcher,
        }
    }

    /// Run both checks for one stored event. Returns the number of deliveries
    /// queued. Lookup failures are logged and never reach the caller.
    pub async fn on_event(&self, event: DetectedEvent<'_>) -> usize {
        self.on_event_at(event, Instant::now()).await
    }

    pub async fn on_event_at(&self, event: DetectedEvent<'_>, now: Instant) -> usize {
        let webhooks = match self.active_webhooks(event.project_id).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                warn!(project_id = event.project_id, error = %e, "Webhook lookup failed");
                return 0;
            }
        };
        if webhooks.is_empty() {
            return 0;
        }

        let mut queued = 0;
        let goal_hooks = subscribers(&webhooks, WebhookEvent::GoalConversion);
        if !goal_hooks.is_empty() {
            queued += self.check_goals(event, &goal_hooks).await;
        }

        let spike_hooks = subscribers(&webhooks, WebhookEvent::TrafficSpike);
        if !spike_hooks.is_empty() {
            if let Some(spike) = self.spikes.record_at(event.project_id, now).await {
                let payload = envelope(WebhookEvent::TrafficSpike, spike_data(&spike));
                queued += self.fan_out(&spike_hooks, WebhookEvent::TrafficSpike, &payload);
            }
        }
        queued
    }

    /// Drop cached webhooks and goals for a project.
    pub async fn invalidate(&self, project_id: &str) {
        let key = project_id.to_string();
        self.webhooks.invalidate(&key).await;
        self.goals.invalidate(&key).await;
    }

    async fn active_webhooks(&self, project_id: &str) -> anyhow::Result<Arc<Vec<Webhook>>> {
        let metadata = Arc::clone(&self.metadata);
        let id = project_id.to_string();
        self.webhooks
            .get_or_compute(project_id.to_string(), || async move {
                metadata.list_active_webhooks(&id).await.map(Arc::new)
            })
            .await
    }

    async fn active_goals(&self, project_id: &str) -> anyhow::Result<Arc<Vec<Goal>>> {
        let metadata = Arc::clone(&self.metadata);
        let id = project_id.to_string();
        self.goals
            .get_or_compute(project_id.to_string(), || async move {
                metadata.list_active_goals(&id).await.map(Arc::new)
            })
            .await
    }

    async fn check_goals(&self, event: DetectedEvent<'_>, hooks: &[&Webhook]) -> usize {
        let goals = match self.active_goals(event.project_id).await {
            Ok(goals) => goals,
            Err(e) => {
                warn!(project_id = event.project_id, error = %e, "Goal lookup failed");
                return 0;
            }
        };

        let mut queued = 0;
        for goal in goals.iter() {
            let Some(kind) = goal.kind() else { continue };
            if !kind.matches(event.kind, event.event_name, event.path, &goal.match_value) {
                continue;
            }
            let payload = envelope(WebhookEvent::GoalConversion, goal_data(goal, kind, event));
            queued += self.fan_out(hooks, WebhookEvent::GoalConversion, &payload);
        }
        queued
    }

    fn fan_out(&self, hooks: &[&Webhook], event: WebhookEvent, payload: &Value) -> usize {
        hooks
            .iter()
            .filter(|hook| {
                self.dispatcher.enqueue(DeliveryJob {
                    webhook_id: hook.id.clone(),
                    url: hook.url.clone(),
                    secret: hook.secret.clone(),
                    event,
                    payload: payload.clone(),
                })
            })
            .count()
    }
}

fn subscribers(webhooks: &[Webhook], event: WebhookEvent) -> Vec<&Webhook> {
    webhooks.iter().filter(|w| w.subscribes_to(event)).collect()
}

fn envelope(event: WebhookEvent, data: Value) -> Value {
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "event": event.as_str(),
        "created_at": Utc::now().to_rfc3339(),
        "data": data,
    })
}

fn goal_data(goal: &Goal, kind: GoalType, event: DetectedEvent<'_>) -> Value {
    let mut data = json!({
        "project_id": event.project_id,
        "goal_id": goal.id,
        "goal_name": goal.name,
        "goal_type": kind.as_str(),
    });
    match kind {
        GoalType::Url => data["path"] = json!(event.path),
        GoalType::Event => data["event_name"] = json!(event.event_name),
    }
    data
}

fn spike_data(spike: &TrafficSpike) -> Value {
    json!({
        "project_id": spike.project_id,
        "current_rate": spike.current_rate,
        "baseline_rate": spike.baseline_rate,
        "event_count": spike.event_count,
        "window_seconds": spike.window_seconds,
    })
}
