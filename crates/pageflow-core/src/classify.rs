//! Create-versus-update decision for an incoming hit.

use chrono::{DateTime, Duration, Utc};

use crate::config::TrackingConfig;
use crate::error::HitError;
use crate::event::{ClientIds, LookbackEvent, LookbackQuery};
use crate::sanitize::{normalized_path, SanitizedHit};

/// What the writer should do with a hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitIntent {
    /// A new page view. `previous` is the visitor's recent event, if any.
    Create { previous: Option<LookbackEvent> },
    /// A heartbeat for the page view that is still open.
    Update { target: LookbackEvent },
}

/// A heartbeat carries no device, browser, version or platform signal.
pub fn is_update_candidate(ids: &ClientIds) -> bool {
    ids.is_empty()
}

pub fn lookback_query(
    uid: &str,
    hit: &SanitizedHit,
    now: DateTime<Utc>,
    config: &TrackingConfig,
) -> LookbackQuery {
    LookbackQuery {
        uid: uid.to_string(),
        since: now - Duration::minutes(config.lookback_minutes),
        host: config.filter_by_domain.then(|| hit.host.clone()),
    }
}

/// Classify a hit against the result of its lookback query.
///
/// | lookback | heartbeat | outcome |
/// |----------|-----------|---------|
/// | found    | yes       | update, or create if the path changed |
/// | found    | no        | create |
/// | missing  | yes       | [`HitError::Unclassifiable`] if it carries time on page, else create |
/// | missing  | no        | create |
pub fn classify(
    hit: &SanitizedHit,
    ids: &ClientIds,
    lookback: Option<LookbackEvent>,
    config: &TrackingConfig,
) -> Result<HitIntent, HitError> {
    let candidate = is_update_candidate(ids);
    match (lookback, candidate) {
        (Some(found), true) => {
            let current = hit.normalized_path(config.track_url_changes);
            let stored =
                normalized_path(&found.page_url, &found.parameters, config.track_url_changes);
            if current == stored {
                Ok(HitIntent::Update { target: found })
            } else {
                Ok(HitIntent::Create {
                    previous: Some(found),
                })
            }
        }
        (Some(found), false) => Ok(HitIntent::Create {
            previous: Some(found),
        }),
        (None, true) if hit.time_on_page > 0 => Err(HitError::Unclassifiable),
        (None, _) => Ok(HitIntent::Create { previous: None }),
    }
}

/// Stored time on page after a heartbeat: always accumulated.
pub fn accumulated_time_on_page(stored: i64, increment: i64) -> i64 {
    stored.saturating_add(increment.max(0))
}
