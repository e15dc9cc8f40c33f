//! Bearer-credential verification
//!
//! Credentials are HS256-signed envelopes carrying a subject and an expiry.
//! Resolution order: `Authorization: Bearer <t>` header, any non-prefixed
//! `Authorization` value, then a `token` query parameter (the streaming
//! endpoint's upgrade URL may carry one). Absent, malformed, expired, or
//! signature-invalid credentials all resolve to a null identity.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::AppError;
use crate::state::AppState;

/// Signed-envelope claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Sign a credential for `subject`, valid for `ttl`.
pub fn issue(
    subject: &str,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let expires_at = clock::now_millis() / 1_000 + ttl.as_secs() as i64;
    let claims = Claims {
        sub: subject.to_string(),
        exp: expires_at as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verify a credential against the shared secret. Expiry is enforced.
pub fn verify(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Pull the raw credential out of a request, header first, query last.
pub fn resolve_credential(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    query
        .and_then(|query| query_param(query, "token"))
        .map(str::to_string)
}

/// Resolve and verify in one step. `None` is a null identity.
pub fn authenticate(headers: &HeaderMap, query: Option<&str>, secret: &str) -> Option<Claims> {
    let token = resolve_credential(headers, query)?;
    verify(&token, secret)
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key && !value.is_empty()).then_some(value)
    })
}

/// Extractor for authenticated request-endpoint callers.
pub struct AuthenticatedUser {
    pub subject: String,
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match authenticate(&parts.headers, parts.uri.query(), &state.config.jwt_secret) {
            Some(claims) => Ok(AuthenticatedUser { subject: claims.sub }),
            None => Err(AppError::Unauthorized(
                "missing or invalid credentials".to_string(),
            )),
        }
    }
}
