use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use tracing::{info, warn};

use janus_auth::LoginScope;
use janus_types::JanusError;
use janus_types::api::{LoginRequest, LoginResponse, ParticipantLoginRequest, SignupRequest};

use crate::AppState;
use crate::error::{ApiError, run_blocking};
use crate::middleware::{OwnerSession, SESSION_COOKIE};

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;

/// Every signup failure looks like this, whatever the cause.
const SIGNUP_FAILED: ApiError = ApiError::Rejected(StatusCode::BAD_REQUEST, "signup failed");

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .build()
}

pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username_len = req.username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username_len)
        || req.password.chars().count() < MIN_PASSWORD_LEN
    {
        return Err(SIGNUP_FAILED);
    }

    let auth = state.auth.clone();
    let db = state.db.clone();
    let token = run_blocking(move || {
        let hash = auth.hash_password(&req.password)?;
        db.create_owner(&req.username, &hash)?;
        Ok(auth.authenticate(&req.username, &req.password, LoginScope::Owner)?)
    })
    .await
    .map_err(|e| {
        warn!("Signup failed: {:?}", e);
        SIGNUP_FAILED
    })?;

    info!("New owner signed up");
    Ok((
        StatusCode::CREATED,
        jar.add(session_cookie(token.clone())),
        Json(LoginResponse { token }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = state.auth.clone();
    let token = run_blocking(move || {
        Ok(auth.authenticate(&req.username, &req.password, LoginScope::Owner)?)
    })
    .await?;

    Ok((jar.add(session_cookie(token.clone())), Json(LoginResponse { token })))
}

/// Participant login is scoped to the event named by `event_key`. An unknown
/// key fails exactly like a bad password.
pub async fn participant_login(
    State(state): State<AppState>,
    Json(req): Json<ParticipantLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = state.auth.clone();
    let db = state.db.clone();
    let token = run_blocking(move || {
        let event = db
            .find_event_by_key(&req.event_key)?
            .ok_or(JanusError::InvalidCredentials)?;
        let scope = LoginScope::Participant { event_id: event.id };
        Ok(auth.authenticate(&req.username, &req.password, scope)?)
    })
    .await?;

    Ok(Json(LoginResponse { token }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    jar: CookieJar,
) -> impl IntoResponse {
    state.auth.revoke(&session.token);
    (
        StatusCode::NO_CONTENT,
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
    )
}
