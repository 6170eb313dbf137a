use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};

use sightline_core::analytics::{GroupCount, GroupKey};
use sightline_core::event::{Event, EventKind};

use crate::DuckDbBackend;

/// Timestamp literal format accepted by `CAST(? AS TIMESTAMP)`.
const TS_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// `CAST(ts AS VARCHAR)` drops the fraction when it is zero.
const TS_READ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub(crate) fn ts_param(at: DateTime<Utc>) -> String {
    at.naive_utc().format(TS_WRITE_FORMAT).to_string()
}

pub(crate) fn parse_ts(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_READ_FORMAT)
        .with_context(|| format!("unparseable timestamp {raw:?}"))
}

const EVENT_COLUMNS: &str = "id, project_id, event_type, event_name, properties, path, referrer, \
     utm_source, utm_medium, utm_campaign, session_id, visitor_hash, browser, os, device, \
     country, city, region, latitude, longitude, scroll_depth, target_url, \
     CAST(created_at AS VARCHAR)";

/// Raw row before the event type and timestamp are validated.
struct EventRow {
    event: Event,
    event_type: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            event: Event {
                id: row.get(0)?,
                project_id: row.get(1)?,
                kind: EventKind::Pageview,
                event_name: row.get(3)?,
                properties: row.get(4)?,
                path: row.get(5)?,
                referrer: row.get(6)?,
                utm_source: row.get(7)?,
                utm_medium: row.get(8)?,
                utm_campaign: row.get(9)?,
                session_id: row.get(10)?,
                visitor_hash: row.get(11)?,
                browser: row.get(12)?,
                os: row.get(13)?,
                device: row.get(14)?,
                country: row.get(15)?,
                city: row.get(16)?,
                region: row.get(17)?,
                latitude: row.get(18)?,
                longitude: row.get(19)?,
                scroll_depth: row.get(20)?,
                target_url: row.get(21)?,
                created_at: DateTime::<Utc>::MIN_UTC,
            },
            event_type: row.get(2)?,
            created_at: row.get(22)?,
        })
    }

    fn into_event(self) -> Result<Event> {
        let mut event = self.event;
        event.kind = self
            .event_type
            .parse()
            .map_err(|e| anyhow!("event {}: {e}", event.id))?;
        event.created_at = parse_ts(&self.created_at)?.and_utc();
        Ok(event)
    }
}

pub async fn insert_event_inner(db: &DuckDbBackend, event: &Event) -> Result<i64> {
    let conn = db.conn.lock().await;
    let id: i64 = conn.query_row(
        r#"INSERT INTO events (
            project_id, event_type, event_name, properties, path, referrer,
            utm_source, utm_medium, utm_campaign, session_id, visitor_hash,
            browser, os, device, country, city, region, latitude, longitude,
            scroll_depth, target_url, created_at
        ) VALUES (
            ?1,  ?2,  ?3,  ?4,  ?5,  ?6,
            ?7,  ?8,  ?9,  ?10, ?11,
            ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19,
            ?20, ?21, CAST(?22 AS TIMESTAMP)
        ) RETURNING id"#,
        duckdb::params![
            event.project_id,
            event.kind.as_str(),
            event.event_name,
            event.properties,
            event.path,
            event.referrer,
            event.utm_source,
            event.utm_medium,
            event.utm_campaign,
            event.session_id,
            event.visitor_hash,
            event.browser,
            event.os,
            event.device,
            event.country,
            event.city,
            event.region,
            event.latitude,
            event.longitude,
            event.scroll_depth,
            event.target_url,
            ts_param(event.created_at),
        ],
        |row| row.get(0),
    )?;
    tracing::debug!(id, project_id = %event.project_id, kind = %event.kind, "Event stored");
    Ok(id)
}

pub async fn select_range_inner(
    db: &DuckDbBackend,
    project_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Event>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events \
         WHERE project_id = ?1 \
           AND created_at >= CAST(?2 AS TIMESTAMP) \
           AND created_at <= CAST(?3 AS TIMESTAMP) \
         ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params![project_id, ts_param(start), ts_param(end)],
        EventRow::from_row,
    )?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?.into_event()?);
    }
    Ok(events)
}

pub async fn group_count_inner(
    db: &DuckDbBackend,
    project_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    key: GroupKey,
) -> Result<Vec<GroupCount>> {
    // The part name is a fixed enum literal, never caller input.
    let sql = format!(
        r#"
        SELECT
            CAST(CAST(date_trunc('{part}', created_at) AS TIMESTAMP) AS VARCHAR) AS bucket,
            COUNT(*) AS events,
            COUNT(DISTINCT visitor_hash) AS visitors
        FROM events
        WHERE project_id = ?1
          AND event_type = 'pageview'
          AND created_at >= CAST(?2 AS TIMESTAMP)
          AND created_at <= CAST(?3 AS TIMESTAMP)
        GROUP BY bucket
        ORDER BY bucket
        "#,
        part = key.as_str()
    );
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        duckdb::params![project_id, ts_param(start), ts_param(end)],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    )?;

    let mut counts = Vec::new();
    for row in rows {
        let (bucket, events, visitors) = row?;
        counts.push(GroupCount {
            bucket: parse_ts(&bucket)?,
            events,
            visitors,
        });
    }
    Ok(counts)
}

pub async fn delete_events_before_inner(db: &DuckDbBackend, cutoff: DateTime<Utc>) -> Result<u64> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute(
        "DELETE FROM events WHERE created_at < CAST(?1 AS TIMESTAMP)",
        duckdb::params![ts_param(cutoff)],
    )?;
    Ok(deleted as u64)
}

pub async fn delete_project_events_inner(db: &DuckDbBackend, project_id: &str) -> Result<u64> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute(
        "DELETE FROM events WHERE project_id = ?1",
        duckdb::params![project_id],
    )?;
    Ok(deleted as u64)
}
