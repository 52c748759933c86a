use std::collections::HashMap;

use anyhow::Result;

use pageflow_core::event::LookupKind;

use crate::DuckDbBackend;

// Table names come from `LookupKind::table`, never from input.

pub(crate) async fn load_lookup_inner(
    db: &DuckDbBackend,
    kind: LookupKind,
) -> Result<HashMap<String, i64>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(&format!("SELECT name, id FROM {}", kind.table()))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut map = HashMap::new();
    for row in rows {
        let (name, id) = row?;
        map.insert(name, id);
    }
    Ok(map)
}

/// Insert `name` if it is new and return its id either way.
pub(crate) async fn insert_lookup_inner(
    db: &DuckDbBackend,
    kind: LookupKind,
    name: &str,
) -> Result<i64> {
    let conn = db.conn.lock().await;
    let table = kind.table();
    conn.execute(
        &format!("INSERT INTO {table} (name) VALUES (?1) ON CONFLICT (name) DO NOTHING"),
        duckdb::params![name],
    )?;
    let id: i64 = conn.query_row(
        &format!("SELECT id FROM {table} WHERE name = ?1"),
        duckdb::params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}
