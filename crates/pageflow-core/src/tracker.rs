//! Hit ingestion pipeline: identity resolution, classification, session
//! correlation and the final statistic write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::classify::{self, accumulated_time_on_page, HitIntent};
use crate::config::TrackingConfig;
use crate::error::HitError;
use crate::event::{ClientIds, EventUpdate, LookbackEvent, NewEvent, SessionUpdate};
use crate::identity::{IdentityResolver, LookupCache};
use crate::sanitize::SanitizedHit;
use crate::session::{plan_session, SessionPlan};
use crate::store::HitStore;
use crate::writer::{StatisticWriter, WriteIntent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrackOutcome {
    Created {
        event_id: i64,
        session_id: i64,
        new_session: bool,
        goals_recorded: usize,
    },
    Updated {
        event_id: i64,
        time_on_page: i64,
        goals_recorded: usize,
    },
}

/// The key a visitor is tracked under: the uid, or the fingerprint when the
/// client sent no uid.
pub fn visitor_key(hit: &SanitizedHit) -> Option<&str> {
    [hit.uid.as_str(), hit.fingerprint.as_str()]
        .into_iter()
        .find(|key| !key.is_empty())
}

pub struct Tracker {
    store: Arc<dyn HitStore>,
    resolver: IdentityResolver,
    writer: StatisticWriter,
    config: TrackingConfig,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn HitStore>,
        cache: Arc<dyn LookupCache>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            resolver: IdentityResolver::new(Arc::clone(&store), cache),
            writer: StatisticWriter::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub async fn track(&self, hit: SanitizedHit) -> Result<TrackOutcome, HitError> {
        self.track_at(hit, Utc::now()).await
    }

    /// Run one sanitized hit through the pipeline as if it arrived at `now`.
    pub async fn track_at(
        &self,
        hit: SanitizedHit,
        now: DateTime<Utc>,
    ) -> Result<TrackOutcome, HitError> {
        let Some(uid) = visitor_key(&hit).map(str::to_string) else {
            return Err(HitError::MissingRequiredFields(vec!["uid"]));
        };

        let ids = self.resolver.resolve_all(&hit.user_agent).await;
        let query = classify::lookback_query(&uid, &hit, now, &self.config);
        let lookback = self.store.find_lookback(&query).await?;
        let intent = classify::classify(&hit, &ids, lookback, &self.config)?;

        match intent {
            HitIntent::Update { target } => self.apply_update(&hit, target, now).await,
            HitIntent::Create { previous } => {
                self.apply_create(&hit, uid, ids, previous, now).await
            }
        }
    }

    async fn apply_update(
        &self,
        hit: &SanitizedHit,
        target: LookbackEvent,
        now: DateTime<Utc>,
    ) -> Result<TrackOutcome, HitError> {
        let event_id = self
            .writer
            .write(
                WriteIntent::Update(EventUpdate {
                    event_id: target.id,
                    time_on_page_increment: hit.time_on_page,
                }),
                now,
            )
            .await?;

        if let SessionPlan::Reuse {
            update: Some(update),
            ..
        } = plan_session(hit, Some(&target), &self.config)
        {
            self.update_session(&update).await;
        }

        // Visit goals were evaluated when the page view was created.
        let goals_recorded = self
            .writer
            .record_goals(event_id, &hit.completed_goals, &[])
            .await;

        Ok(TrackOutcome::Updated {
            event_id,
            time_on_page: accumulated_time_on_page(target.time_on_page, hit.time_on_page),
            goals_recorded,
        })
    }

    async fn apply_create(
        &self,
        hit: &SanitizedHit,
        uid: String,
        ids: ClientIds,
        previous: Option<LookbackEvent>,
        now: DateTime<Utc>,
    ) -> Result<TrackOutcome, HitError> {
        // A signal-free navigation keeps the identity of the page it came from.
        let ids = match &previous {
            Some(prev) if ids.is_empty() => prev.ids,
            _ => ids,
        };

        let event = StatisticWriter::prepare_create(
            NewEvent {
                uid,
                session_id: 0,
                page_url: hit.path.clone(),
                parameters: hit.parameters.clone(),
                page_id: hit.page_id,
                page_type: Some(hit.page_type.clone()),
                referrer: hit.referrer.clone(),
                ids,
                time_on_page: hit.time_on_page,
                bounce: true,
                first_time_visit: false,
                time: now,
            },
            now,
        )?;

        let (session_id, new_session, session_update) =
            match plan_session(hit, previous.as_ref(), &self.config) {
                SessionPlan::Reuse { session_id, update } => (session_id, false, update),
                SessionPlan::Open(session) => (self.store.insert_session(&session).await?, true, None),
            };

        let written = self
            .writer
            .write(
                WriteIntent::Create(NewEvent {
                    session_id,
                    bounce: new_session,
                    ..event
                }),
                now,
            )
            .await;
        let event_id = match written {
            Ok(id) => id,
            Err(e) => {
                if new_session {
                    if let Err(cleanup) = self.store.delete_session(session_id).await {
                        warn!(session_id, error = %cleanup, "Failed to drop session of unwritten event");
                    }
                }
                return Err(e);
            }
        };

        // Earlier events stop counting as bounces only once this one is stored.
        if !new_session {
            if let Err(e) = self.store.clear_session_bounce(session_id).await {
                warn!(session_id, error = %e, "Failed to clear session bounce");
            }
            if let Some(update) = session_update {
                self.update_session(&update).await;
            }
        }

        let goals_recorded = self.record_goals(event_id, hit).await;

        Ok(TrackOutcome::Created {
            event_id,
            session_id,
            new_session,
            goals_recorded,
        })
    }

    async fn update_session(&self, update: &SessionUpdate) {
        if let Err(e) = self.store.update_session(update).await {
            warn!(session_id = update.session_id, error = %e, "Session update failed");
        }
    }

    async fn record_goals(&self, event_id: i64, hit: &SanitizedHit) -> usize {
        let server = match self.store.visit_goal_ids(&hit.path).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Visit goal evaluation failed");
                Vec::new()
            }
        };
        self.writer
            .record_goals(event_id, &hit.completed_goals, &server)
            .await
    }
}
