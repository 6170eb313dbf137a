use anyhow::{anyhow, Result};
use duckdb::Connection;

use sightline_core::analytics::{Funnel, FunnelStep};
use sightline_metadata::CreateFunnelStepParams;

use crate::backend::generate_id;
use crate::DuckDbBackend;

const MAX_STEPS_PER_FUNNEL: usize = 8;

fn validate_steps(steps: &[CreateFunnelStepParams]) -> Result<()> {
    if steps.len() > MAX_STEPS_PER_FUNNEL {
        return Err(anyhow!("a funnel has at most {MAX_STEPS_PER_FUNNEL} steps"));
    }
    if steps.iter().any(|s| s.match_value.trim().is_empty()) {
        return Err(anyhow!("step match_value is required"));
    }
    Ok(())
}

fn load_steps(conn: &Connection, funnel_id: &str) -> Result<Vec<FunnelStep>> {
    let mut stmt = conn.prepare(
        "SELECT id, funnel_id, step_number, step_type, match_value, label \
         FROM funnel_steps WHERE funnel_id = ?1 ORDER BY step_number ASC",
    )?;
    let rows = stmt.query_map(duckdb::params![funnel_id], |row| {
        let step_number: i32 = row.get(2)?;
        Ok(FunnelStep {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            step_number: step_number.max(0) as u32,
            step_type: row.get(3)?,
            match_value: row.get(4)?,
            label: row.get(5)?,
        })
    })?;

    let mut steps = Vec::new();
    for row in rows {
        steps.push(row?);
    }
    Ok(steps)
}

fn get_funnel_with_conn(
    conn: &Connection,
    project_id: &str,
    funnel_id: &str,
) -> Result<Option<Funnel>> {
    let mut stmt =
        conn.prepare("SELECT id, project_id, name FROM funnels WHERE id = ?1 AND project_id = ?2")?;
    let mut rows = stmt.query(duckdb::params![funnel_id, project_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let id: String = row.get(0)?;
    let steps = load_steps(conn, &id)?;
    Ok(Some(Funnel {
        id,
        project_id: row.get(1)?,
        name: row.get(2)?,
        steps,
    }))
}

pub async fn get_funnel_inner(
    db: &DuckDbBackend,
    project_id: &str,
    funnel_id: &str,
) -> Result<Option<Funnel>> {
    let conn = db.conn.lock().await;
    get_funnel_with_conn(&conn, project_id, funnel_id)
}

pub async fn get_funnel_steps_inner(
    db: &DuckDbBackend,
    funnel_id: &str,
) -> Result<Vec<FunnelStep>> {
    let conn = db.conn.lock().await;
    load_steps(&conn, funnel_id)
}

/// Steps are numbered 1..n in the order given.
pub async fn create_funnel_inner(
    db: &DuckDbBackend,
    project_id: &str,
    name: &str,
    steps: Vec<CreateFunnelStepParams>,
) -> Result<Funnel> {
    if name.trim().is_empty() {
        return Err(anyhow!("funnel name is required"));
    }
    validate_steps(&steps)?;

    let mut conn = db.conn.lock().await;
    let funnel_id = generate_id("funnel", 21);
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO funnels (id, project_id, name) VALUES (?1, ?2, ?3)",
        duckdb::params![&funnel_id, project_id, name],
    )?;
    for (idx, step) in steps.iter().enumerate() {
        let label = step
            .label
            .clone()
            .unwrap_or_else(|| step.match_value.clone());
        tx.execute(
            "INSERT INTO funnel_steps (id, funnel_id, step_number, step_type, match_value, label) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            duckdb::params![
                generate_id("step", 21),
                &funnel_id,
                (idx + 1) as i64,
                &step.step_type,
                &step.match_value,
                label,
            ],
        )?;
    }
    tx.commit()?;

    get_funnel_with_conn(&conn, project_id, &funnel_id)?
        .ok_or_else(|| anyhow!("failed to load created funnel"))
}
