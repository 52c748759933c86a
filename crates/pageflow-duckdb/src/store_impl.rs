use std::collections::HashMap;

use async_trait::async_trait;

use pageflow_core::event::{
    EventUpdate, LookbackEvent, LookbackQuery, LookupKind, NewEvent, NewSession, SessionUpdate,
};
use pageflow_core::store::HitStore;

use crate::DuckDbBackend;

#[async_trait]
impl HitStore for DuckDbBackend {
    async fn load_lookup(&self, kind: LookupKind) -> anyhow::Result<HashMap<String, i64>> {
        crate::lookup::load_lookup_inner(self, kind).await
    }

    async fn insert_lookup(&self, kind: LookupKind, name: &str) -> anyhow::Result<i64> {
        crate::lookup::insert_lookup_inner(self, kind, name).await
    }

    async fn find_lookback(&self, query: &LookbackQuery) -> anyhow::Result<Option<LookbackEvent>> {
        crate::hits::find_lookback_inner(self, query).await
    }

    async fn insert_session(&self, session: &NewSession) -> anyhow::Result<i64> {
        crate::sessions::insert_session_inner(self, session).await
    }

    async fn update_session(&self, update: &SessionUpdate) -> anyhow::Result<()> {
        crate::sessions::update_session_inner(self, update).await
    }

    async fn delete_session(&self, session_id: i64) -> anyhow::Result<()> {
        crate::sessions::delete_session_inner(self, session_id).await
    }

    async fn insert_event(&self, event: &NewEvent) -> anyhow::Result<i64> {
        crate::hits::insert_event_inner(self, event).await
    }

    async fn add_time_on_page(&self, update: &EventUpdate) -> anyhow::Result<()> {
        crate::hits::add_time_on_page_inner(self, update).await
    }

    async fn clear_session_bounce(&self, session_id: i64) -> anyhow::Result<()> {
        crate::hits::clear_session_bounce_inner(self, session_id).await
    }

    async fn visit_goal_ids(&self, page_url: &str) -> anyhow::Result<Vec<i64>> {
        crate::goals::visit_goal_ids_inner(self, page_url).await
    }

    async fn insert_goal_completions(
        &self,
        statistic_id: i64,
        goal_ids: &[i64],
    ) -> anyhow::Result<usize> {
        crate::goals::insert_goal_completions_inner(self, statistic_id, goal_ids).await
    }
}
