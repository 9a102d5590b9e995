use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use janus_types::models::Timestamp;

/// What a realtime connection joined as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    pub participant_username: String,
    pub participant_id: i64,
    pub event_key: String,
    pub event_id: i64,
}

struct SessionEntry {
    session: ConnectionSession,
    touched_at: Timestamp,
}

/// Maps live connection ids to the participant and event they joined.
///
/// There is no background timer: every `bind` sweeps entries older than the
/// TTL, so a lookup may briefly see an entry slightly past its TTL.
#[derive(Clone)]
pub struct ConnectionSessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
    ttl: Duration,
}

impl ConnectionSessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn bind(&self, conn_id: Uuid, session: ConnectionSession) {
        self.bind_at(conn_id, session, Utc::now());
    }

    /// Upsert the binding for `conn_id`, stamped `now`, then sweep stale entries.
    pub fn bind_at(&self, conn_id: Uuid, session: ConnectionSession, now: Timestamp) {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            conn_id,
            SessionEntry {
                session,
                touched_at: now,
            },
        );

        let before = sessions.len();
        sessions.retain(|_, entry| now - entry.touched_at <= self.ttl);
        let swept = before - sessions.len();
        if swept > 0 {
            debug!("Swept {} stale connection sessions", swept);
        }
    }

    pub fn lookup(&self, conn_id: Uuid) -> Option<ConnectionSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&conn_id)
            .map(|entry| entry.session.clone())
    }

    pub fn unbind(&self, conn_id: Uuid) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionSessionRegistry {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(username: &str, event_id: i64) -> ConnectionSession {
        ConnectionSession {
            participant_username: username.into(),
            participant_id: 1,
            event_key: format!("key{event_id}"),
            event_id,
        }
    }

    #[test]
    fn bind_then_lookup() {
        let registry = ConnectionSessionRegistry::default();
        let conn = Uuid::new_v4();
        registry.bind(conn, session("alice", 1));

        assert_eq!(registry.lookup(conn), Some(session("alice", 1)));
        assert_eq!(registry.lookup(Uuid::new_v4()), None);
    }

    #[test]
    fn rebinding_replaces_previous_tuple() {
        let registry = ConnectionSessionRegistry::default();
        let conn = Uuid::new_v4();
        registry.bind(conn, session("alice", 1));
        registry.bind(conn, session("bob", 2));

        assert_eq!(registry.lookup(conn), Some(session("bob", 2)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn bind_sweeps_entries_older_than_ttl() {
        let registry = ConnectionSessionRegistry::new(Duration::hours(1));
        let t0 = Utc::now();
        let stale = Uuid::new_v4();
        let recent = Uuid::new_v4();
        registry.bind_at(stale, session("old", 1), t0);
        registry.bind_at(recent, session("mid", 1), t0 + Duration::minutes(30));

        // Still visible between sweeps.
        assert!(registry.lookup(stale).is_some());

        let fresh = Uuid::new_v4();
        registry.bind_at(fresh, session("new", 1), t0 + Duration::minutes(61));

        assert_eq!(registry.lookup(stale), None);
        assert!(registry.lookup(recent).is_some());
        assert!(registry.lookup(fresh).is_some());
    }

    #[test]
    fn unbind_removes_binding() {
        let registry = ConnectionSessionRegistry::default();
        let conn = Uuid::new_v4();
        registry.bind(conn, session("alice", 1));

        assert!(registry.unbind(conn));
        assert!(!registry.unbind(conn));
        assert!(registry.is_empty());
    }
}
