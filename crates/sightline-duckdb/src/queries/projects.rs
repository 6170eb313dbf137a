use anyhow::{anyhow, Result};
use duckdb::Connection;

use sightline_metadata::{CreateProjectParams, Project};

use crate::backend::{generate_id, rand_hex};
use crate::DuckDbBackend;

const PROJECT_COLUMNS: &str =
    "id, name, domain, api_key, report_email, CAST(created_at AS VARCHAR)";

fn project_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        api_key: row.get(3)?,
        report_email: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_one(conn: &Connection, filter: &str, value: &str) -> Result<Option<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE {filter} = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(duckdb::params![value], project_from_row)?;
    let first = rows.next().transpose()?;
    Ok(first)
}

pub async fn create_project_inner(
    db: &DuckDbBackend,
    params: CreateProjectParams,
) -> Result<Project> {
    if params.name.trim().is_empty() || params.domain.trim().is_empty() {
        return Err(anyhow!("project name and domain are required"));
    }
    let conn = db.conn.lock().await;
    let id = generate_id("proj", 10);
    let api_key = format!("sl_{}", rand_hex(16));
    conn.execute(
        "INSERT INTO projects (id, name, domain, api_key, report_email)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        duckdb::params![&id, &params.name, &params.domain, &api_key, &params.report_email],
    )?;
    query_one(&conn, "id", &id)?.ok_or_else(|| anyhow!("failed to load created project"))
}

pub async fn get_project_inner(db: &DuckDbBackend, id: &str) -> Result<Option<Project>> {
    let conn = db.conn.lock().await;
    query_one(&conn, "id", id)
}

pub async fn find_project_by_api_key_inner(
    db: &DuckDbBackend,
    api_key: &str,
) -> Result<Option<Project>> {
    let conn = db.conn.lock().await;
    query_one(&conn, "api_key", api_key)
}

pub async fn list_projects_inner(db: &DuckDbBackend) -> Result<Vec<Project>> {
    let conn = db.conn.lock().await;
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], project_from_row)?;

    let mut projects = Vec::new();
    for row in rows {
        projects.push(row?);
    }
    Ok(projects)
}
