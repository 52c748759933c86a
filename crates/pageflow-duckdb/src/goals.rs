use anyhow::Result;

use pageflow_core::event::Goal;

use crate::DuckDbBackend;

impl DuckDbBackend {
    /// Insert a goal definition and return its id. `goal.id` is ignored.
    pub async fn create_goal(&self, goal: &Goal) -> Result<i64> {
        let conn = self.conn.lock().await;
        let id: i64 = conn.query_row(
            "INSERT INTO goals (title, goal_type, url, status) VALUES (?1, ?2, ?3, ?4) RETURNING id",
            duckdb::params![goal.title, goal.goal_type, goal.url, goal.status],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub async fn list_goals(&self) -> Result<Vec<Goal>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT id, title, goal_type, url, status FROM goals ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Goal {
                id: row.get(0)?,
                title: row.get(1)?,
                goal_type: row.get(2)?,
                url: row.get(3)?,
                status: row.get(4)?,
            })
        })?;
        let mut goals = Vec::new();
        for row in rows {
            goals.push(row?);
        }
        Ok(goals)
    }
}

/// Active `visits` goals whose url is the page path or `*`.
pub(crate) async fn visit_goal_ids_inner(db: &DuckDbBackend, page_url: &str) -> Result<Vec<i64>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id FROM goals \
         WHERE goal_type = 'visits' AND status = 'active' AND (url = ?1 OR url = '*') \
         ORDER BY id",
    )?;
    let rows = stmt.query_map(duckdb::params![page_url], |row| row.get::<_, i64>(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Insert completion rows in one transaction. Existing pairs are ignored.
pub(crate) async fn insert_goal_completions_inner(
    db: &DuckDbBackend,
    statistic_id: i64,
    goal_ids: &[i64],
) -> Result<usize> {
    if goal_ids.is_empty() {
        return Ok(0);
    }

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let mut inserted = 0;
    for goal_id in goal_ids {
        inserted += tx.execute(
            "INSERT OR IGNORE INTO goal_completions (goal_id, statistic_id) VALUES (?1, ?2)",
            duckdb::params![goal_id, statistic_id],
        )?;
    }
    tx.commit()?;
    Ok(inserted)
}
