pub mod auth;
pub mod error;
pub mod events;
pub mod export;
pub mod middleware;

use std::sync::Arc;

use janus_auth::Authenticator;
use janus_db::Database;
use janus_gateway::RealtimeFlow;

pub use error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub auth: Arc<Authenticator>,
    pub flow: RealtimeFlow,
    pub limits: Limits,
}

/// Free-tier quotas.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_free_events: usize,
    pub max_free_participants: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_free_events: 5,
            max_free_participants: 2,
        }
    }
}
