use anyhow::{anyhow, Result};

use sightline_metadata::{
    CreateWebhookParams, Webhook, WebhookDelivery, WebhookDeliveryRecord, WebhookEvent,
};

use crate::backend::generate_id;
use crate::DuckDbBackend;

pub async fn create_webhook_inner(
    db: &DuckDbBackend,
    params: CreateWebhookParams,
) -> Result<Webhook> {
    if params.events.is_empty() {
        return Err(anyhow!("webhook must subscribe to at least one event"));
    }
    if !(params.url.starts_with("http://") || params.url.starts_with("https://")) {
        return Err(anyhow!("webhook url must be http(s)"));
    }
    let conn = db.conn.lock().await;
    let id = generate_id("hook", 16);
    conn.execute(
        "INSERT INTO webhooks (id, project_id, url, secret, events, active) \
         VALUES (?1, ?2, ?3, ?4, ?5, true)",
        duckdb::params![
            &id,
            &params.project_id,
            &params.url,
            &params.secret,
            WebhookEvent::join(&params.events),
        ],
    )?;
    Ok(Webhook {
        id,
        project_id: params.project_id,
        url: params.url,
        secret: params.secret,
        events: params.events,
        active: true,
    })
}

pub async fn list_active_webhooks_inner(
    db: &DuckDbBackend,
    project_id: &str,
) -> Result<Vec<Webhook>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, project_id, url, secret, events, active FROM webhooks \
         WHERE project_id = ?1 AND active ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(duckdb::params![project_id], |row| {
        let events: String = row.get(4)?;
        Ok(Webhook {
            id: row.get(0)?,
            project_id: row.get(1)?,
            url: row.get(2)?,
            secret: row.get(3)?,
            events: WebhookEvent::parse_list(&events),
            active: row.get(5)?,
        })
    })?;

    let mut hooks = Vec::new();
    for row in rows {
        hooks.push(row?);
    }
    Ok(hooks)
}

pub async fn record_webhook_delivery_inner(
    db: &DuckDbBackend,
    delivery: WebhookDelivery,
) -> Result<()> {
    let conn = db.conn.lock().await;
    let body = delivery
        .response_body
        .as_deref()
        .map(WebhookDelivery::truncate_body);
    conn.execute(
        r#"INSERT INTO webhook_deliveries (
            id, webhook_id, event_type, attempt, response_code, response_body, success, error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        duckdb::params![
            generate_id("dlv", 16),
            &delivery.webhook_id,
            delivery.event_type.as_str(),
            delivery.attempt as i64,
            delivery.response_code.map(i64::from),
            body,
            delivery.success,
            &delivery.error,
        ],
    )?;
    Ok(())
}

pub async fn list_webhook_deliveries_inner(
    db: &DuckDbBackend,
    webhook_id: &str,
) -> Result<Vec<WebhookDeliveryRecord>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, webhook_id, event_type, attempt, response_code, response_body, success, error, \
         CAST(created_at AS VARCHAR) \
         FROM webhook_deliveries WHERE webhook_id = ?1 ORDER BY created_at, attempt",
    )?;
    let rows = stmt.query_map(duckdb::params![webhook_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<i64>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, bool>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, webhook_id, event_type, attempt, code, body, success, error, created_at) = row?;
        let event_type = WebhookEvent::parse(&event_type)
            .ok_or_else(|| anyhow!("unknown webhook event type {event_type:?}"))?;
        records.push(WebhookDeliveryRecord {
            id,
            delivery: WebhookDelivery {
                webhook_id,
                event_type,
                attempt: attempt.max(0) as u32,
                response_code: code.and_then(|c| u16::try_from(c).ok()),
                response_body: body,
                success,
                error,
            },
            created_at,
        });
    }
    Ok(records)
}
