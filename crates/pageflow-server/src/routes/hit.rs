use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::debug;

use pageflow_core::event::HitPayload;
use pageflow_core::sanitize::{self, SanitizedHit};

use crate::state::AppState;

/// Hit bodies are a handful of short fields.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Plain-text answer of the ingestion endpoints. Always sent with `200`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitReply {
    Ok,
    Test,
    Blocked,
    Rejected,
    Queued,
}

impl HitReply {
    pub fn as_str(self) -> &'static str {
        match self {
            HitReply::Ok => "ok",
            HitReply::Test => "test",
            HitReply::Blocked => "blocked",
            HitReply::Rejected => "rejected",
            HitReply::Queued => "queued",
        }
    }
}

impl IntoResponse for HitReply {
    fn into_response(self) -> Response {
        self.as_str().into_response()
    }
}

/// `POST /api/hit`: record a page view or heartbeat before answering.
///
/// The outcome of tracking itself is only logged; the browser sees `ok`
/// whenever the hit passed admission.
#[tracing::instrument(skip_all)]
pub async fn hit(State(state): State<Arc<AppState>>, request: Request) -> HitReply {
    let hit = match admit(&state, request).await {
        Ok(hit) => hit,
        Err(reply) => return reply,
    };
    state.ingest(hit).await;
    HitReply::Ok
}

/// `POST /api/beacon`: same body as `/api/hit` (usually sent as
/// `text/plain` by `navigator.sendBeacon`), processed after the reply.
#[tracing::instrument(skip_all)]
pub async fn beacon(State(state): State<Arc<AppState>>, request: Request) -> HitReply {
    let hit = match admit(&state, request).await {
        Ok(hit) => hit,
        Err(reply) => return reply,
    };
    state.enqueue_beacon(hit);
    HitReply::Queued
}

/// Parse and screen a hit. `Err` carries the reply for hits that stop here.
async fn admit(state: &AppState, request: Request) -> Result<SanitizedHit, HitReply> {
    let (parts, body) = request.into_parts();

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            debug!(error = %e, "Unreadable hit body");
            HitReply::Rejected
        })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        debug!(error = %e, "Hit body is not JSON");
        HitReply::Rejected
    })?;

    if HitPayload::is_connectivity_check(&value) {
        return Err(HitReply::Test);
    }

    if let Some(ip) = client_ip(&parts) {
        if state.config.is_excluded_ip(ip) {
            debug!(%ip, "Hit from excluded address");
            return Err(HitReply::Blocked);
        }
    }

    let payload: HitPayload = serde_json::from_value(value).map_err(|e| {
        debug!(error = %e, "Hit body has the wrong shape");
        HitReply::Rejected
    })?;

    let hit = sanitize::prepare(&payload);
    if hit.user_agent.is_bot || sender_is_bot(&parts) {
        debug!("Hit from crawler");
        return Err(HitReply::Blocked);
    }
    Ok(hit)
}

/// First `X-Forwarded-For` entry, falling back to the TCP peer address.
fn client_ip(parts: &Parts) -> Option<IpAddr> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

/// Crawlers that post hits themselves identify in the request header rather
/// than in the body.
fn sender_is_bot(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| sanitize::parse_user_agent(ua).is_bot)
}
