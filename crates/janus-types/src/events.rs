use serde::{Deserialize, Serialize};

use crate::models::Timestamp;

/// Events sent over the realtime gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Reply to a successful `Join`, carrying the current total.
    Joined {
        event_key: String,
        event_name: String,
        username: String,
        total: i64,
        max_value: i64,
    },

    /// Reply to a failed `Join`. Carries no detail on purpose.
    JoinFailed,

    /// An accepted update, fanned out to every connection in the event's group.
    Update {
        timestamp: Timestamp,
        username: String,
        total: i64,
        delta: i64,
    },

    /// Reply to the sender only when its update was not applied.
    UpdateFailed,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Bind this connection to the participant owning `token`.
    Join { token: String },

    /// Move the counter by `delta`; only `+1` and `-1` are accepted.
    Update { delta: i64 },
}
