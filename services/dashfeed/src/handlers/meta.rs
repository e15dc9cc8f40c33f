use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;

/// Lifetime of a credential issued by `/token`.
const TOKEN_TTL: Duration = Duration::from_secs(12 * 3_600);
/// Subject used when `/token` is called without a `userId`.
const DEFAULT_SUBJECT: &str = "demo";

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// Ready iff the persistence backend answers a liveness probe.
pub async fn ready(State(state): State<AppState>) -> Response {
    if state.store.ping().await {
        Json(json!({ "ok": true })).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Dev-convenience credential mint. A production deployment issues tokens
/// from its identity service; only the envelope contract matters here.
pub async fn token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<TokenParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.rate_limiter.check(&format!("{}:token", addr.ip()))?;

    let subject = params
        .user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_SUBJECT);
    let token =
        auth::issue(subject, &state.config.jwt_secret, TOKEN_TTL).context("signing token")?;

    Ok(Json(json!({ "token": token })))
}
