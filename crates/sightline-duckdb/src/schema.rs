/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// Every statement uses `IF NOT EXISTS`, so re-running it on startup is a
/// no-op for an existing database.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `SIGHTLINE_DUCKDB_MEMORY`, default `"1GB"`). The DuckDB default of
/// 80% of system RAM is not acceptable for a server process.
///
/// Events carry no primary key: ids come from `events_id_seq` and DuckDB
/// index maintenance on a PK slows bulk retention deletes considerably.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- PROJECTS
-- ===========================================
CREATE TABLE IF NOT EXISTS projects (
    id              VARCHAR PRIMARY KEY,           -- 'proj_' + 10 chars
    name            VARCHAR NOT NULL,
    domain          VARCHAR NOT NULL,
    api_key         VARCHAR NOT NULL UNIQUE,       -- 'sl_' + 32 hex chars
    report_email    VARCHAR,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_projects_api_key ON projects(api_key);

-- ===========================================
-- EVENTS (append-only)
-- ===========================================
CREATE SEQUENCE IF NOT EXISTS events_id_seq START 1;

CREATE TABLE IF NOT EXISTS events (
    id              BIGINT NOT NULL DEFAULT nextval('events_id_seq'),
    project_id      VARCHAR NOT NULL,
    -- pageview | heartbeat | custom | scroll | outbound | download
    event_type      VARCHAR NOT NULL,
    event_name      VARCHAR,
    properties      VARCHAR,                       -- JSON object
    path            VARCHAR NOT NULL,
    referrer        VARCHAR,
    utm_source      VARCHAR,
    utm_medium      VARCHAR,
    utm_campaign    VARCHAR,
    session_id      VARCHAR NOT NULL,
    visitor_hash    VARCHAR(64) NOT NULL,
    browser         VARCHAR,
    os              VARCHAR,
    device          VARCHAR,
    country         VARCHAR,
    city            VARCHAR,
    region          VARCHAR,
    latitude        DOUBLE,
    longitude       DOUBLE,
    scroll_depth    INTEGER,
    target_url      VARCHAR,
    created_at      TIMESTAMP NOT NULL
);

-- Primary query pattern: project + time range
CREATE INDEX IF NOT EXISTS idx_events_project_time
    ON events(project_id, created_at);
CREATE INDEX IF NOT EXISTS idx_events_project_session
    ON events(project_id, session_id, created_at);
-- Retention sweep
CREATE INDEX IF NOT EXISTS idx_events_created_at
    ON events(created_at);

-- ===========================================
-- GOALS
-- ===========================================
CREATE TABLE IF NOT EXISTS goals (
    id              VARCHAR PRIMARY KEY,
    project_id      VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    goal_type       VARCHAR NOT NULL,              -- 'url' | 'event'
    match_value     VARCHAR NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT true,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_goals_project ON goals(project_id);

-- ===========================================
-- FUNNELS
-- ===========================================
CREATE TABLE IF NOT EXISTS funnels (
    id              VARCHAR PRIMARY KEY,
    project_id      VARCHAR NOT NULL,
    name            VARCHAR NOT NULL,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_funnels_project ON funnels(project_id);

CREATE TABLE IF NOT EXISTS funnel_steps (
    id              VARCHAR PRIMARY KEY,
    funnel_id       VARCHAR NOT NULL,
    step_number     INTEGER NOT NULL,
    step_type       VARCHAR NOT NULL,              -- 'url' | 'event'
    match_value     VARCHAR NOT NULL,
    label           VARCHAR NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_funnel_steps_funnel_number
    ON funnel_steps(funnel_id, step_number);

-- ===========================================
-- WEBHOOKS
-- ===========================================
CREATE TABLE IF NOT EXISTS webhooks (
    id              VARCHAR PRIMARY KEY,
    project_id      VARCHAR NOT NULL,
    url             VARCHAR NOT NULL,
    secret          VARCHAR NOT NULL,
    events          VARCHAR NOT NULL,              -- comma-separated subscription list
    active          BOOLEAN NOT NULL DEFAULT true,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_webhooks_project ON webhooks(project_id);

-- One row per delivery attempt.
CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id              VARCHAR PRIMARY KEY,
    webhook_id      VARCHAR NOT NULL,
    event_type      VARCHAR NOT NULL,
    attempt         INTEGER NOT NULL,
    response_code   INTEGER,
    response_body   VARCHAR,                       -- first 1024 bytes
    success         BOOLEAN NOT NULL,
    error           VARCHAR,
    created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_webhook
    ON webhook_deliveries(webhook_id, created_at);
"#
    )
}
