use std::collections::HashMap;

use async_trait::async_trait;

use crate::event::{
    EventUpdate, LookbackEvent, LookbackQuery, LookupKind, NewEvent, NewSession, SessionUpdate,
};

/// Storage operations the ingestion pipeline needs.
///
/// Self-hosted mode implements this on DuckDB. Every method is a single keyed
/// statement; the pipeline never asks for a cross-row transaction and
/// undoes a half-finished create by hand.
#[async_trait]
pub trait HitStore: Send + Sync + 'static {
    /// The full name→id map of one lookup table.
    async fn load_lookup(&self, kind: LookupKind) -> anyhow::Result<HashMap<String, i64>>;

    /// Insert `name` if absent and return its id.
    async fn insert_lookup(&self, kind: LookupKind, name: &str) -> anyhow::Result<i64>;

    /// The visitor's most recent event (highest id) inside the lookback window.
    async fn find_lookback(&self, query: &LookbackQuery) -> anyhow::Result<Option<LookbackEvent>>;

    async fn insert_session(&self, session: &NewSession) -> anyhow::Result<i64>;

    async fn update_session(&self, update: &SessionUpdate) -> anyhow::Result<()>;

    /// Drop a session opened for an event that was never stored.
    async fn delete_session(&self, session_id: i64) -> anyhow::Result<()>;

    async fn insert_event(&self, event: &NewEvent) -> anyhow::Result<i64>;

    /// Add to the stored `time_on_page`; never overwrite it.
    async fn add_time_on_page(&self, update: &EventUpdate) -> anyhow::Result<()>;

    /// Mark every event of the session as engaged (`bounce = 0`).
    async fn clear_session_bounce(&self, session_id: i64) -> anyhow::Result<()>;

    /// Active `visits` goals matching the page path.
    async fn visit_goal_ids(&self, page_url: &str) -> anyhow::Result<Vec<i64>>;

    /// Insert goal completions, silently skipping pairs that already exist.
    /// Returns the number of new rows.
    async fn insert_goal_completions(
        &self,
        statistic_id: i64,
        goal_ids: &[i64],
    ) -> anyhow::Result<usize>;
}
