use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::debug;
use types::event;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::pipeline;
use crate::state::AppState;

/// `POST /ingest`: accept a single event object or an array of them.
///
/// Validation is per-record; the response acknowledges only what survived.
pub async fn ingest_batch(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    user: AuthenticatedUser,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    state
        .rate_limiter
        .check(&format!("{}:ingest", addr.ip()))?;

    let raw = match payload {
        Value::Array(records) => records,
        record @ Value::Object(_) => vec![record],
        _ => Vec::new(),
    };
    if raw.is_empty() {
        return Err(AppError::EmptyPayload);
    }

    let received = raw.len();
    let events = event::filter_batch(raw);
    if events.is_empty() {
        return Err(AppError::NoValidEvents);
    }
    if events.len() < received {
        debug!(
            subject = %user.subject,
            dropped = received - events.len(),
            "dropped invalid records"
        );
    }

    let accepted = events.len();
    pipeline::publish_batch(&state, events);

    Ok(Json(json!({ "accepted": accepted })))
}
