use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::error::HitError;
use crate::event::{EventUpdate, NewEvent};
use crate::store::HitStore;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    Create(NewEvent),
    Update(EventUpdate),
}

/// Executes a classified hit against the `events` and `goal_completions`
/// tables.
pub struct StatisticWriter {
    store: Arc<dyn HitStore>,
}

impl StatisticWriter {
    pub fn new(store: Arc<dyn HitStore>) -> Self {
        Self { store }
    }

    /// Normalise a row for insertion: stamp `time`, reset `first_time_visit`
    /// (tagged later by a batch recompute), strip empty optional fields and
    /// require `uid` and `page_url`.
    pub fn prepare_create(mut event: NewEvent, now: DateTime<Utc>) -> Result<NewEvent, HitError> {
        let mut missing = Vec::new();
        if event.uid.is_empty() {
            missing.push("uid");
        }
        if event.page_url.is_empty() {
            missing.push("page_url");
        }
        if !missing.is_empty() {
            return Err(HitError::MissingRequiredFields(missing));
        }

        event.time = now;
        event.first_time_visit = false;
        event.page_type = event.page_type.filter(|v| !v.is_empty());
        event.referrer = event.referrer.filter(|v| !v.is_empty());
        Ok(event)
    }

    /// Insert or update one event row, returning its id.
    pub async fn write(&self, intent: WriteIntent, now: DateTime<Utc>) -> Result<i64, HitError> {
        match intent {
            WriteIntent::Create(event) => {
                let event = Self::prepare_create(event, now)?;
                let id = self.store.insert_event(&event).await?;
                Ok(id)
            }
            WriteIntent::Update(update) => {
                if update.event_id <= 0 {
                    return Err(HitError::MissingEventId);
                }
                self.store.add_time_on_page(&update).await?;
                Ok(update.event_id)
            }
        }
    }

    /// Record goal completions for `statistic_id`.
    ///
    /// Client-reported and server-evaluated goals are merged; duplicates,
    /// including pairs already stored, are absorbed. Failures are logged and
    /// count as zero rows.
    pub async fn record_goals(&self, statistic_id: i64, client: &[i64], server: &[i64]) -> usize {
        let mut goal_ids: Vec<i64> = Vec::with_capacity(client.len() + server.len());
        for id in client.iter().chain(server) {
            if *id > 0 && !goal_ids.contains(id) {
                goal_ids.push(*id);
            }
        }
        if goal_ids.is_empty() || statistic_id <= 0 {
            return 0;
        }

        match self
            .store
            .insert_goal_completions(statistic_id, &goal_ids)
            .await
        {
            Ok(inserted) => {
                if inserted > 0 {
                    info!(statistic_id, inserted, "Goal completions recorded");
                }
                inserted
            }
            Err(e) => {
                error!(statistic_id, error = %e, "Goal completion insert failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ClientIds;
    use crate::tracker::tests::MemoryStore;
    use chrono::TimeZone;

    fn row(uid: &str, page_url: &str) -> NewEvent {
        NewEvent {
            uid: uid.to_string(),
            session_id: 1,
            page_url: page_url.to_string(),
            parameters: String::new(),
            page_id: 0,
            page_type: Some(String::new()),
            referrer: Some(String::new()),
            ids: ClientIds::default(),
            time_on_page: 0,
            bounce: true,
            first_time_visit: true,
            time: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().expect("ts"),
        }
    }

    #[test]
    fn prepare_create_stamps_and_strips() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("ts");
        let event = StatisticWriter::prepare_create(row("u1", "/a"), now).expect("valid");
        assert_eq!(event.time, now);
        assert!(!event.first_time_visit);
        assert_eq!(event.page_type, None);
        assert_eq!(event.referrer, None);
    }

    #[test]
    fn prepare_create_requires_uid_and_page_url() {
        let err = StatisticWriter::prepare_create(row("", ""), Utc::now()).expect_err("rejected");
        match err {
            HitError::MissingRequiredFields(fields) => assert_eq!(fields, vec!["uid", "page_url"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_requires_event_id() {
        let writer = StatisticWriter::new(Arc::new(MemoryStore::default()));
        let result = writer
            .write(
                WriteIntent::Update(EventUpdate {
                    event_id: 0,
                    time_on_page_increment: 5,
                }),
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(HitError::MissingEventId)));
    }

    #[tokio::test]
    async fn goal_completions_are_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let writer = StatisticWriter::new(Arc::clone(&store) as Arc<dyn HitStore>);

        assert_eq!(writer.record_goals(10, &[1, 2], &[2, 3]).await, 3);
        assert_eq!(writer.record_goals(10, &[1], &[3]).await, 0);
        assert_eq!(store.goal_completions().len(), 3);
        assert_eq!(writer.record_goals(10, &[], &[]).await, 0);
    }
}
