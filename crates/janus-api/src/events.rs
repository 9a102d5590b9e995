use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tracing::info;

use janus_auth::keys;
use janus_db::models::ClaimOutcome;
use janus_db::queries::{EventEdit, WindowEdit};
use janus_types::JanusError;
use janus_types::api::{
    ClaimResponse, CreateEventRequest, EditEventRequest, EventDetail, EventSummary,
    ParticipantSummary, TotalResponse,
};
use janus_types::models::{Event, EventWindow};

use crate::AppState;
use crate::error::{ApiError, run_blocking};
use crate::export;
use crate::middleware::OwnerSession;

const DEFAULT_EVENT_NAME: &str = "Untitled Event";

/// Look an event up by key and make sure `owner_id` owns it. Someone else's
/// event is reported as missing.
fn owned_event(state: &AppState, key: &str, owner_id: i64) -> Result<Event, ApiError> {
    state
        .db
        .find_event_by_key(key)?
        .filter(|event| event.owner_id == owner_id)
        .ok_or_else(|| JanusError::EventNotFound.into())
}

fn event_detail(state: &AppState, event: &Event) -> Result<EventDetail, ApiError> {
    let total = state.flow.counter().compute_total(event)?;
    let participants = state.db.list_participants(event.id)?;
    Ok(EventDetail {
        event: EventSummary::from(event),
        total,
        participants: participants.iter().map(ParticipantSummary::from).collect(),
    })
}

/// The owner's events, newest first.
pub async fn list_events(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
) -> Result<impl IntoResponse, ApiError> {
    let events = run_blocking(move || Ok(state.db.list_events_for_owner(session.owner.id)?)).await?;
    let summaries: Vec<EventSummary> = events.iter().map(EventSummary::from).collect();
    Ok(Json(summaries))
}

/// Create a free event, subject to the per-owner quota.
pub async fn create_event(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string());

    let event = run_blocking(move || {
        Ok(state.db.create_free_event(
            session.owner.id,
            &name,
            state.limits.max_free_events,
            &mut keys::generate_event_key,
        )?)
    })
    .await?;

    info!(event = %event.key, owner = event.owner_id, "Event created");
    Ok((StatusCode::CREATED, Json(EventSummary::from(&event))))
}

pub async fn get_event(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = run_blocking(move || {
        let event = owned_event(&state, &key, session.owner.id)?;
        event_detail(&state, &event)
    })
    .await?;
    Ok(Json(detail))
}

/// Apply an edit all-or-nothing and return the event as it now stands.
pub async fn edit_event(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    Path(key): Path<String>,
    Json(req): Json<EditEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::Rejected(StatusCode::BAD_REQUEST, "event name is empty"));
    }
    if req
        .new_participant
        .as_ref()
        .is_some_and(|p| p.username.trim().is_empty())
    {
        return Err(ApiError::Rejected(StatusCode::BAD_REQUEST, "username is empty"));
    }
    let window = match (req.clear_window, EventWindow::from_bounds(req.start_time, req.end_time)?) {
        (false, None) => WindowEdit::Keep,
        (false, Some(window)) => WindowEdit::Set(window),
        (true, None) => WindowEdit::Clear,
        (true, Some(_)) => return Err(JanusError::InvalidEventWindow.into()),
    };

    let detail = run_blocking(move || {
        let event = owned_event(&state, &key, session.owner.id)?;

        let new_participant = match req.new_participant {
            Some(p) => {
                let password = p.password.unwrap_or_else(keys::generate_password);
                Some((p.username, state.auth.hash_password(&password)?))
            }
            None => None,
        };
        let password_changes = req
            .password_changes
            .into_iter()
            .map(|c| -> Result<(String, String), ApiError> {
                Ok((c.username, state.auth.hash_password(&c.password)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let edit = EventEdit {
            name: req.name,
            max_value: req.max_value,
            window,
            new_participant,
            password_changes,
        };
        state
            .db
            .apply_event_edit(event.id, &edit, state.limits.max_free_participants)?;

        let event = state.db.get_event(event.id)?.ok_or(JanusError::EventNotFound)?;
        event_detail(&state, &event)
    })
    .await?;

    info!(event = %detail.event.key, "Event edited");
    Ok(Json(detail))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    run_blocking(move || {
        let event = owned_event(&state, &key, session.owner.id)?;
        state.db.delete_event(event.id)?;
        info!(event = %event.key, "Event deleted");
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Download the ledger of a premium event as CSV.
pub async fn export_event(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (name, entries) = run_blocking(move || {
        let event = owned_event(&state, &key, session.owner.id)?;
        if !event.is_premium {
            return Err(ApiError::Rejected(
                StatusCode::FORBIDDEN,
                "export requires a premium event",
            ));
        }
        let entries = state.flow.counter().ledger(&event)?;
        Ok((event.name, entries))
    })
    .await?;

    let disposition = format!("attachment; filename={}", export::export_filename(&name));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export::ledger_csv(&entries),
    ))
}

/// Redeem a one-time premium claim. Unknown, foreign and spent tokens all fail
/// the same way.
pub async fn redeem_claim(
    State(state): State<AppState>,
    Extension(session): Extension<OwnerSession>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = run_blocking(move || {
        Ok(state.db.redeem_premium_claim(
            &token,
            session.owner.id,
            &mut keys::generate_event_key,
        )?)
    })
    .await?;

    match outcome {
        ClaimOutcome::Redeemed(event) => {
            info!(event = %event.key, owner = event.owner_id, "Premium claim redeemed");
            Ok((
                StatusCode::CREATED,
                Json(ClaimResponse {
                    event_key: event.key,
                }),
            ))
        }
        ClaimOutcome::Unknown => Err(ApiError::Status(StatusCode::NOT_FOUND)),
    }
}

/// Public read of an event's current total, for third-party polling.
pub async fn event_total(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let response = run_blocking(move || {
        let event = state
            .db
            .find_event_by_key(&key)?
            .ok_or(JanusError::EventNotFound)?;
        let total = state.flow.counter().compute_total(&event)?;
        Ok(TotalResponse {
            key: event.key,
            total,
        })
    })
    .await?;
    Ok(Json(response))
}
