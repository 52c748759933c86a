use anyhow::Result;

use pageflow_core::event::{NewSession, SessionUpdate};

use crate::DuckDbBackend;

pub(crate) async fn insert_session_inner(db: &DuckDbBackend, session: &NewSession) -> Result<i64> {
    let conn = db.conn.lock().await;
    let id: i64 = conn.query_row(
        "INSERT INTO sessions (referrer, first_visited_url, last_visited_url, host, city_code) \
         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
        duckdb::params![
            session.referrer,
            session.first_visited_url,
            session.last_visited_url,
            session.host,
            session.city_code,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub(crate) async fn update_session_inner(db: &DuckDbBackend, update: &SessionUpdate) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute(
        "UPDATE sessions SET last_visited_url = ?1, host = ?2 WHERE id = ?3",
        duckdb::params![update.last_visited_url, update.host, update.session_id],
    )?;
    Ok(())
}

pub(crate) async fn delete_session_inner(db: &DuckDbBackend, session_id: i64) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute("DELETE FROM sessions WHERE id = ?1", duckdb::params![session_id])?;
    Ok(())
}
