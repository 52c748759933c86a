//! Session correlation: reuse the visitor's open session or open a new one.

use crate::config::TrackingConfig;
use crate::event::{LookbackEvent, NewSession, SessionUpdate};
use crate::sanitize::SanitizedHit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPlan {
    /// Attach to an existing session; `update` is `None` when its cached
    /// navigation fields already match the hit.
    Reuse {
        session_id: i64,
        update: Option<SessionUpdate>,
    },
    Open(NewSession),
}

impl SessionPlan {
    pub fn writes(&self) -> bool {
        !matches!(self, SessionPlan::Reuse { update: None, .. })
    }
}

/// Host as stored on sessions: only with domain filtering, never empty.
pub fn session_host(hit: &SanitizedHit, config: &TrackingConfig) -> Option<String> {
    if config.filter_by_domain && !hit.host.is_empty() {
        Some(hit.host.clone())
    } else {
        None
    }
}

pub fn plan_session(
    hit: &SanitizedHit,
    previous: Option<&LookbackEvent>,
    config: &TrackingConfig,
) -> SessionPlan {
    let url = hit.normalized_path(config.track_url_changes);
    let host = session_host(hit, config);

    match previous {
        Some(prev) if prev.session_id > 0 => {
            let changed = session_changed(
                prev.session_last_url.as_deref(),
                prev.session_host.as_deref(),
                &url,
                host.as_deref(),
            );
            SessionPlan::Reuse {
                session_id: prev.session_id,
                update: changed.then(|| SessionUpdate {
                    session_id: prev.session_id,
                    last_visited_url: url,
                    host,
                }),
            }
        }
        _ => SessionPlan::Open(NewSession {
            referrer: hit.referrer.clone(),
            first_visited_url: url.clone(),
            last_visited_url: url,
            host,
            city_code: None,
        }),
    }
}

/// Cheap equality check between a session's cached `(url, host)` and the hit.
pub fn session_changed(
    stored_url: Option<&str>,
    stored_host: Option<&str>,
    url: &str,
    host: Option<&str>,
) -> bool {
    stored_url != Some(url) || stored_host != host
}
