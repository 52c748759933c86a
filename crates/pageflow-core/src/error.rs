use thiserror::Error;

/// Failures on the ingestion path.
///
/// None of these are surfaced to the browser: the HTTP layer logs them and
/// still answers with a success-shaped status.
#[derive(Debug, Error)]
pub enum HitError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<&'static str>),

    #[error("update requires an event id")]
    MissingEventId,

    #[error("unable to classify hit: heartbeat without a matching page view")]
    Unclassifiable,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
