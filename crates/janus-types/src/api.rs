use serde::{Deserialize, Serialize};

use crate::models::{Event, EventStatus, Participant, Timestamp};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParticipantLoginRequest {
    pub event_key: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

// -- Events --

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CreateEventRequest {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewParticipant {
    pub username: String,
    /// When omitted a random password is set; the owner changes it later.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PasswordChange {
    pub username: String,
    pub password: String,
}

/// Applied as one transaction: all of it lands or none of it does.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EditEventRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub max_value: Option<i64>,
    /// Premium events only; both bounds or neither.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub end_time: Option<Timestamp>,
    /// Remove the window so the event runs indefinitely. Cannot be combined
    /// with new bounds.
    #[serde(default)]
    pub clear_window: bool,
    #[serde(default)]
    pub new_participant: Option<NewParticipant>,
    #[serde(default)]
    pub password_changes: Vec<PasswordChange>,
}

#[derive(Debug, Serialize)]
pub struct EventSummary {
    pub key: String,
    pub name: String,
    pub is_premium: bool,
    pub max_value: i64,
    pub status: EventStatus,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            key: event.key.clone(),
            name: event.name.clone(),
            is_premium: event.is_premium,
            max_value: event.max_value,
            status: event.status_at(chrono::Utc::now()),
            start_time: event.window.map(|w| w.start()),
            end_time: event.window.map(|w| w.end()),
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ParticipantSummary {
    pub username: String,
    pub created_at: Timestamp,
}

impl From<&Participant> for ParticipantSummary {
    fn from(p: &Participant) -> Self {
        Self {
            username: p.username.clone(),
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventDetail {
    #[serde(flatten)]
    pub event: EventSummary,
    pub total: i64,
    pub participants: Vec<ParticipantSummary>,
}

#[derive(Debug, Serialize)]
pub struct TotalResponse {
    pub key: String,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub event_key: String,
}
