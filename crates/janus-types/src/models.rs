use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JanusError;

pub type Timestamp = DateTime<Utc>;

/// Which row-type a principal id refers to. Owner and participant ids come
/// from separate tables, so the kind is part of every principal reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Owner,
    Participant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId {
    pub kind: PrincipalKind,
    pub id: i64,
}

impl PrincipalId {
    pub fn owner(id: i64) -> Self {
        Self { kind: PrincipalKind::Owner, id }
    }

    pub fn participant(id: i64) -> Self {
        Self { kind: PrincipalKind::Participant, id }
    }
}

/// Where a username must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsernameScope {
    Global,
    Event(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub signup_time: Timestamp,
    pub last_authentication: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: i64,
    pub event_id: i64,
    pub username: String,
    pub password_hash: String,
    pub created_at: Timestamp,
}

/// Anything that can log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Owner(Owner),
    Participant(Participant),
}

impl Principal {
    pub fn id(&self) -> i64 {
        match self {
            Self::Owner(o) => o.id,
            Self::Participant(p) => p.id,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Self::Owner(_) => PrincipalKind::Owner,
            Self::Participant(_) => PrincipalKind::Participant,
        }
    }

    pub fn principal_id(&self) -> PrincipalId {
        PrincipalId {
            kind: self.kind(),
            id: self.id(),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::Owner(o) => &o.username,
            Self::Participant(p) => &p.username,
        }
    }

    pub fn username_scope(&self) -> UsernameScope {
        match self {
            Self::Owner(_) => UsernameScope::Global,
            Self::Participant(p) => UsernameScope::Event(p.event_id),
        }
    }

    pub fn password_hash(&self) -> &str {
        match self {
            Self::Owner(o) => &o.password_hash,
            Self::Participant(p) => &p.password_hash,
        }
    }
}

/// A premium event's active period. Construction guarantees `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventWindow {
    start: Timestamp,
    end: Timestamp,
}

impl EventWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, JanusError> {
        if end <= start {
            return Err(JanusError::InvalidEventWindow);
        }
        Ok(Self { start, end })
    }

    /// Builds a window from optional bounds: both or neither must be present.
    pub fn from_bounds(
        start: Option<Timestamp>,
        end: Option<Timestamp>,
    ) -> Result<Option<Self>, JanusError> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(start, end).map(Some),
            (None, None) => Ok(None),
            _ => Err(JanusError::InvalidEventWindow),
        }
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && at <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Happening,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub key: String,
    pub window: Option<EventWindow>,
    /// Informational ceiling shown to clients; `-1` means unbounded.
    pub max_value: i64,
    pub is_premium: bool,
    pub created_at: Timestamp,
    pub lazy_total: i64,
}

impl Event {
    /// Free events and windowless premium events are always happening.
    pub fn status_at(&self, now: Timestamp) -> EventStatus {
        let window = match (&self.window, self.is_premium) {
            (Some(window), true) => window,
            _ => return EventStatus::Happening,
        };
        if now < window.start() {
            EventStatus::Scheduled
        } else if now > window.end() {
            EventStatus::Finished
        } else {
            EventStatus::Happening
        }
    }

    pub fn is_happening_at(&self, now: Timestamp) -> bool {
        self.status_at(now) == EventStatus::Happening
    }

    pub fn is_happening(&self) -> bool {
        self.is_happening_at(Utc::now())
    }
}

/// One ledger entry of a premium event. Identity is `(participant_id, time)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub event_id: i64,
    pub participant_id: i64,
    pub time: Timestamp,
    pub value: i64,
}

/// A single counter step. Anything other than `+1`/`-1` is rejected at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delta {
    Increment,
    Decrement,
}

impl Delta {
    pub fn value(self) -> i64 {
        match self {
            Self::Increment => 1,
            Self::Decrement => -1,
        }
    }
}

impl TryFrom<i64> for Delta {
    type Error = JanusError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Increment),
            -1 => Ok(Self::Decrement),
            other => Err(JanusError::InvalidUpdateValue(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn event(is_premium: bool, window: Option<EventWindow>) -> Event {
        Event {
            id: 1,
            owner_id: 1,
            name: "Untitled Event".into(),
            key: "abcdEFGH".into(),
            window,
            max_value: -1,
            is_premium,
            created_at: at(0),
            lazy_total: 0,
        }
    }

    #[test]
    fn window_requires_end_after_start() {
        assert!(EventWindow::new(at(10), at(10)).is_err());
        assert!(EventWindow::new(at(10), at(5)).is_err());
        assert!(EventWindow::new(at(10), at(11)).is_ok());
    }

    #[test]
    fn window_bounds_are_both_or_neither() {
        assert!(matches!(EventWindow::from_bounds(None, None), Ok(None)));
        assert!(EventWindow::from_bounds(Some(at(1)), None).is_err());
        assert!(EventWindow::from_bounds(None, Some(at(1))).is_err());
        assert!(matches!(
            EventWindow::from_bounds(Some(at(1)), Some(at(2))),
            Ok(Some(_))
        ));
    }

    #[test]
    fn premium_event_walks_through_window_states() {
        let start = at(1_000);
        let window = EventWindow::new(start, start + Duration::seconds(3600)).unwrap();
        let ev = event(true, Some(window));

        assert_eq!(ev.status_at(start - Duration::seconds(1)), EventStatus::Scheduled);
        assert_eq!(ev.status_at(start), EventStatus::Happening);
        assert_eq!(ev.status_at(start + Duration::seconds(3600)), EventStatus::Happening);
        assert_eq!(ev.status_at(start + Duration::seconds(3601)), EventStatus::Finished);
    }

    #[test]
    fn free_and_windowless_events_always_happen() {
        let window = EventWindow::new(at(0), at(1)).unwrap();
        assert!(event(false, Some(window)).is_happening_at(at(99)));
        assert!(event(true, None).is_happening_at(at(99)));
    }

    #[test]
    fn delta_accepts_only_unit_steps() {
        assert_eq!(Delta::try_from(1).unwrap(), Delta::Increment);
        assert_eq!(Delta::try_from(-1).unwrap().value(), -1);
        assert!(matches!(
            Delta::try_from(2),
            Err(JanusError::InvalidUpdateValue(2))
        ));
        assert!(Delta::try_from(0).is_err());
    }

    #[test]
    fn principal_exposes_common_surface() {
        let p = Principal::Participant(Participant {
            id: 7,
            event_id: 3,
            username: "alice".into(),
            password_hash: "hash".into(),
            created_at: at(0),
        });
        assert_eq!(p.principal_id(), PrincipalId::participant(7));
        assert_eq!(p.username_scope(), UsernameScope::Event(3));
        assert_eq!(p.password_hash(), "hash");
    }
}
