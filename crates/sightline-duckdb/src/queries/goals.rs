use anyhow::{anyhow, Result};

use sightline_core::analytics::{Goal, GoalType};
use sightline_metadata::CreateGoalParams;

use crate::backend::generate_id;
use crate::DuckDbBackend;

const MAX_GOALS_PER_PROJECT: i64 = 50;

fn validate_goal(params: &CreateGoalParams) -> Result<()> {
    if params.name.trim().is_empty() {
        return Err(anyhow!("goal name is required"));
    }
    if params.match_value.trim().is_empty() {
        return Err(anyhow!("goal match_value is required"));
    }
    if GoalType::parse(&params.goal_type).is_none() {
        // Stored anyway; analysis treats unknown types as never converting.
        tracing::warn!(goal_type = %params.goal_type, "Creating goal with unknown type");
    }
    Ok(())
}

pub async fn create_goal_inner(db: &DuckDbBackend, params: CreateGoalParams) -> Result<Goal> {
    validate_goal(&params)?;
    let conn = db.conn.lock().await;

    let count: i64 = conn
        .prepare("SELECT COUNT(*) FROM goals WHERE project_id = ?1")?
        .query_row(duckdb::params![&params.project_id], |row| row.get(0))?;
    if count >= MAX_GOALS_PER_PROJECT {
        return Err(anyhow!("limit_exceeded"));
    }

    let id = generate_id("goal", 21);
    conn.execute(
        "INSERT INTO goals (id, project_id, name, goal_type, match_value, active) \
         VALUES (?1, ?2, ?3, ?4, ?5, true)",
        duckdb::params![
            &id,
            &params.project_id,
            &params.name,
            &params.goal_type,
            &params.match_value
        ],
    )?;

    Ok(Goal {
        id,
        project_id: params.project_id,
        name: params.name,
        goal_type: params.goal_type,
        match_value: params.match_value,
        active: true,
    })
}

pub async fn list_active_goals_inner(db: &DuckDbBackend, project_id: &str) -> Result<Vec<Goal>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, project_id, name, goal_type, match_value, active \
         FROM goals WHERE project_id = ?1 AND active ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(duckdb::params![project_id], |row| {
        Ok(Goal {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            goal_type: row.get(3)?,
            match_value: row.get(4)?,
            active: row.get(5)?,
        })
    })?;

    let mut goals = Vec::new();
    for row in rows {
        goals.push(row?);
    }
    Ok(goals)
}
