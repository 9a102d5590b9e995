use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use janus_types::JanusError;
use janus_types::models::{Owner, Principal};

use crate::AppState;
use crate::error::{ApiError, run_blocking};

/// Cookie carrying the owner token for browser clients.
pub const SESSION_COOKIE: &str = "session";

/// The authenticated owner, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct OwnerSession {
    pub owner: Owner,
    pub token: String,
}

/// Resolve the owner token from `Authorization: Bearer` or the session cookie.
/// Participant tokens are refused.
pub async fn require_owner(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_string()))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let auth = state.auth.clone();
    let lookup = token.clone();
    let principal = run_blocking(move || match auth.resolve(&lookup) {
        Ok(principal) => Ok(principal),
        Err(JanusError::ParticipantNotFound) => Err(JanusError::TokenNotFoundOrExpired.into()),
        Err(e) => Err(e.into()),
    })
    .await?;

    let Principal::Owner(owner) = principal else {
        return Err(StatusCode::UNAUTHORIZED.into());
    };

    req.extensions_mut().insert(OwnerSession { owner, token });
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
