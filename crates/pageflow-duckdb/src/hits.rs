use anyhow::Result;
use chrono::{DateTime, Utc};

use pageflow_core::event::{ClientIds, EventUpdate, LookbackEvent, LookbackQuery, NewEvent};

use crate::DuckDbBackend;

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Most recent event for the visitor inside the lookback window, joined with
/// its session's cached navigation fields.
pub(crate) async fn find_lookback_inner(
    db: &DuckDbBackend,
    query: &LookbackQuery,
) -> Result<Option<LookbackEvent>> {
    let conn = db.conn.lock().await;

    let mut sql = String::from(
        "SELECT e.id, e.session_id, e.page_url, e.parameters, e.time_on_page, \
                e.device_id, e.browser_id, e.browser_version_id, e.platform_id, \
                s.last_visited_url, s.host \
         FROM events e \
         LEFT JOIN sessions s ON s.id = e.session_id \
         WHERE e.uid = ?1 AND e.time >= ?2",
    );
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> = vec![
        Box::new(query.uid.clone()),
        Box::new(format_ts(query.since)),
    ];
    if let Some(host) = &query.host {
        sql.push_str(" AND s.host = ?3");
        params.push(Box::new(host.clone()));
    }
    sql.push_str(" ORDER BY e.id DESC LIMIT 1");

    let refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(refs.as_slice())?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    Ok(Some(LookbackEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        page_url: row.get(2)?,
        parameters: row.get(3)?,
        time_on_page: row.get(4)?,
        ids: ClientIds {
            device_id: row.get(5)?,
            browser_id: row.get(6)?,
            browser_version_id: row.get(7)?,
            platform_id: row.get(8)?,
        },
        session_last_url: row.get(9)?,
        session_host: row.get(10)?,
    }))
}

pub(crate) async fn insert_event_inner(db: &DuckDbBackend, event: &NewEvent) -> Result<i64> {
    let conn = db.conn.lock().await;
    let id: i64 = conn.query_row(
        "INSERT INTO events (
            uid, session_id, page_url, parameters, page_id, page_type, referrer,
            device_id, browser_id, browser_version_id, platform_id,
            time_on_page, bounce, first_time_visit, time
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11,
            ?12, ?13, ?14, ?15
        ) RETURNING id",
        duckdb::params![
            event.uid,
            event.session_id,
            event.page_url,
            event.parameters,
            event.page_id,
            event.page_type,
            event.referrer,
            event.ids.device_id,
            event.ids.browser_id,
            event.ids.browser_version_id,
            event.ids.platform_id,
            event.time_on_page,
            i32::from(event.bounce),
            i32::from(event.first_time_visit),
            format_ts(event.time),
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Heartbeats always add to the stored value.
pub(crate) async fn add_time_on_page_inner(db: &DuckDbBackend, update: &EventUpdate) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute(
        "UPDATE events SET time_on_page = time_on_page + ?1 WHERE id = ?2",
        duckdb::params![update.time_on_page_increment.max(0), update.event_id],
    )?;
    Ok(())
}

pub(crate) async fn clear_session_bounce_inner(db: &DuckDbBackend, session_id: i64) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute(
        "UPDATE events SET bounce = 0 WHERE session_id = ?1 AND bounce = 1",
        duckdb::params![session_id],
    )?;
    Ok(())
}
