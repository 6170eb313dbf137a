//! Signed, retrying webhook delivery on a bounded background worker pool.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use sightline_core::config::Config;
use sightline_metadata::{MetadataStore, WebhookDelivery, WebhookEvent};

pub const SIGNATURE_HEADER: &str = "x-sightline-signature";
pub const EVENT_HEADER: &str = "x-sightline-event";
/// First attempt plus two retries.
pub const MAX_ATTEMPTS: u32 = 3;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` keyed with `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {e}"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub workers: usize,
    pub queue_size: usize,
    pub timeout: Duration,
    /// Delay before retry `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.webhook_workers.max(1),
            queue_size: config.webhook_queue_size.max(1),
            timeout: Duration::from_secs(10),
            backoff_step: Duration::from_secs(5),
        }
    }
}

/// One payload bound for one webhook.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub webhook_id: String,
    pub url: String,
    pub secret: String,
    pub event: WebhookEvent,
    pub payload: Value,
}

/// Producer side of the delivery queue. Cloning shares the same workers.
#[derive(Clone)]
pub struct WebhookDispatcher {
    sender: mpsc::Sender<DeliveryJob>,
}

impl WebhookDispatcher {
    /// Spawn `settings.workers` delivery workers. Must be called inside a
    /// Tokio runtime. Workers exit once every dispatcher clone is dropped.
    pub fn start(
        metadata: Arc<dyn MetadataStore>,
        settings: DispatchSettings,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let (sender, receiver) = mpsc::channel::<DeliveryJob>(settings.queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..settings.workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let client = client.clone();
            let metadata = Arc::clone(&metadata);
            let backoff_step = settings.backoff_step;
            tokio::spawn(async move {
                loop {
                    let job = receiver.lock().await.recv().await;
                    let Some(job) = job else { break };
                    deliver(&client, metadata.as_ref(), &job, backoff_step).await;
                }
                debug!(worker, "Webhook worker stopped");
            });
        }
        info!(
            workers = settings.workers,
            queue_size = settings.queue_size,
            "Webhook dispatcher started"
        );
        Ok(Self { sender })
    }

    /// Queue a job without waiting. Returns `false` when the job was dropped.
    pub fn enqueue(&self, job: DeliveryJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    webhook_id = %job.webhook_id,
                    event = job.event.as_str(),
                    "Webhook queue full; delivery dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(webhook_id = %job.webhook_id, "Webhook dispatcher closed; delivery dropped");
                false
            }
        }
    }
}

/// POST `job` until it succeeds or [`MAX_ATTEMPTS`] is reached, recording an
/// audit row per attempt. Returns whether any attempt succeeded.
pub async fn deliver(
    client: &reqwest::Client,
    metadata: &dyn MetadataStore,
    job: &DeliveryJob,
    backoff_step: Duration,
) -> bool {
    let body = match serde_json::to_vec(&job.payload) {
        Ok(body) => body,
        Err(e) => {
            warn!(webhook_id = %job.webhook_id, error = %e, "Webhook payload not serializable");
            return false;
        }
    };
    let signature = match sign_payload(&job.secret, &body) {
        Ok(hex) => format!("sha256={hex}"),
        Err(e) => {
            warn!(webhook_id = %job.webhook_id, error = %e, "Webhook signing failed");
            return false;
        }
    };

    let mut attempt = 1;
    loop {
        let delivery = attempt_once(client, job, &body, &signature, attempt).await;
        let success = delivery.success;
        if let Err(e) = metadata.record_webhook_delivery(delivery).await {
            warn!(
                webhook_id = %job.webhook_id,
                attempt,
                error = %e,
                "Failed to record webhook delivery"
            );
        }
        if success {
            return true;
        }
        if attempt >= MAX_ATTEMPTS {
            warn!(
                webhook_id = %job.webhook_id,
                event = job.event.as_str(),
                attempts = attempt,
                "Webhook delivery failed"
            );
            return false;
        }
        tokio::time::sleep(backoff_step * attempt).await;
        attempt += 1;
    }
}

async fn attempt_once(
    client: &reqwest::Client,
    job: &DeliveryJob,
    body: &[u8],
    signature: &str,
    attempt: u32,
) -> WebhookDelivery {
    let result = client
        .post(&job.url)
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_HEADER, job.event.as_str())
        .body(body.to_vec())
        .send()
        .await;

    match result {
        Ok(response) => {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            debug!(
                webhook_id = %job.webhook_id,
                attempt,
                status = status.as_u16(),
                "Webhook attempt"
            );
            WebhookDelivery {
                webhook_id: job.webhook_id.clone(),
                event_type: job.event,
                attempt,
                response_code: Some(status.as_u16()),
                response_body: Some(WebhookDelivery::truncate_body(&text)),
                success: status.is_success(),
                error: None,
            }
        }
        Err(e) => {
            debug!(webhook_id = %job.webhook_id, attempt, error = %e, "Webhook attempt errored");
            WebhookDelivery {
                webhook_id: job.webhook_id.clone(),
                event_type: job.event,
                attempt,
                response_code: None,
                response_body: None,
                success: false,
                error: Some(e.to_string()),
            }
        }
    }
}
