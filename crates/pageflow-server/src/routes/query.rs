use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

use pageflow_core::query::{assemble, QueryMode, QueryRequest};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub data: Vec<Map<String, Value>>,
    pub meta: QueryMeta,
}

#[derive(Debug, Serialize)]
pub struct QueryMeta {
    pub mode: QueryMode,
    pub select: Vec<&'static str>,
}

/// `POST /api/query`: run an aggregate query over the event table.
///
/// Callers presenting `Authorization: Bearer <admin token>` get the flexible
/// vocabulary and raw SQL fragments; everyone else is held to strict mode.
/// Fields that fail validation are dropped rather than rejected.
#[tracing::instrument(skip_all)]
pub async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<QueryResponse>, AppError> {
    let input: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?;
    if !input.is_object() {
        return Err(AppError::BadRequest(
            "query body must be a JSON object".to_string(),
        ));
    }

    let mode = trust_level(&headers, state.config.admin_token.as_deref());
    let request = QueryRequest::from_value(&input, mode);
    let assembled = assemble(&request);
    tracing::debug!(mode = mode.as_str(), sql = assembled.sql(), "Running query");

    let data = state.db.run_query(&assembled).await?;

    Ok(Json(QueryResponse {
        data,
        meta: QueryMeta {
            mode,
            select: request.columns(),
        },
    }))
}

fn trust_level(headers: &HeaderMap, admin_token: Option<&str>) -> QueryMode {
    let Some(expected) = admin_token else {
        return QueryMode::Strict;
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if tokens_match(token, expected) => QueryMode::Flexible,
        _ => QueryMode::Strict,
    }
}

/// Byte comparison whose running time does not depend on where the tokens
/// first differ.
fn tokens_match(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
