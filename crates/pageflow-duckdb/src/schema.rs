/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` is passed at runtime from `Config.duckdb_memory_limit`
/// (env `PAGEFLOW_DUCKDB_MEMORY`, default `"1GB"`). DuckDB accepts any size
/// string it supports, e.g. `"512MB"`, `"1GB"`, `"4GB"`.
///
/// Surrogate ids come from sequences. Lookup ids start at 1 so `0` can mean
/// "unknown" on `events`.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

CREATE SEQUENCE IF NOT EXISTS events_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS sessions_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS browsers_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS browser_versions_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS platforms_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS devices_id_seq START 1;
CREATE SEQUENCE IF NOT EXISTS goals_id_seq START 1;

-- ===========================================
-- EVENTS (one row per page view)
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('events_id_seq'),
    uid                 VARCHAR NOT NULL,
    session_id          BIGINT NOT NULL DEFAULT 0,
    page_url            VARCHAR NOT NULL,
    parameters          VARCHAR NOT NULL DEFAULT '',
    page_id             BIGINT NOT NULL DEFAULT 0,
    page_type           VARCHAR,
    referrer            VARCHAR,
    device_id           BIGINT NOT NULL DEFAULT 0,
    browser_id          BIGINT NOT NULL DEFAULT 0,
    browser_version_id  BIGINT NOT NULL DEFAULT 0,
    platform_id         BIGINT NOT NULL DEFAULT 0,
    time_on_page        BIGINT NOT NULL DEFAULT 0,     -- milliseconds, accumulated by heartbeats
    bounce              INTEGER NOT NULL DEFAULT 1,
    first_time_visit    INTEGER NOT NULL DEFAULT 0,
    time                TIMESTAMP NOT NULL
);

-- Lookback: most recent event per visitor inside the window.
CREATE INDEX IF NOT EXISTS idx_events_uid_time ON events(uid, time);
CREATE INDEX IF NOT EXISTS idx_events_time ON events(time);
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);

-- ===========================================
-- SESSIONS
-- ===========================================
CREATE TABLE IF NOT EXISTS sessions (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('sessions_id_seq'),
    referrer            VARCHAR,
    first_visited_url   VARCHAR NOT NULL,
    last_visited_url    VARCHAR NOT NULL,
    host                VARCHAR,                       -- only with domain filtering
    city_code           VARCHAR
);

-- ===========================================
-- LOOKUP TABLES (name -> id)
-- ===========================================
CREATE TABLE IF NOT EXISTS browsers (
    id      BIGINT PRIMARY KEY DEFAULT nextval('browsers_id_seq'),
    name    VARCHAR NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS browser_versions (
    id      BIGINT PRIMARY KEY DEFAULT nextval('browser_versions_id_seq'),
    name    VARCHAR NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS platforms (
    id      BIGINT PRIMARY KEY DEFAULT nextval('platforms_id_seq'),
    name    VARCHAR NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS devices (
    id      BIGINT PRIMARY KEY DEFAULT nextval('devices_id_seq'),
    name    VARCHAR NOT NULL UNIQUE
);

-- ===========================================
-- GOALS
-- ===========================================
CREATE TABLE IF NOT EXISTS goals (
    id          BIGINT PRIMARY KEY DEFAULT nextval('goals_id_seq'),
    title       VARCHAR NOT NULL,
    goal_type   VARCHAR NOT NULL DEFAULT 'clicks',     -- 'visits' goals are evaluated server-side
    url         VARCHAR NOT NULL DEFAULT '*',
    status      VARCHAR NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS goal_completions (
    goal_id         BIGINT NOT NULL,
    statistic_id    BIGINT NOT NULL,                   -- events.id
    PRIMARY KEY (goal_id, statistic_id)
);
"#
    )
}
