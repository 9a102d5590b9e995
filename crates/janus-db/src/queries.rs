use crate::models::{ClaimOutcome, EventListingRow, LedgerRow, PremiumChange};
use crate::Database;
use anyhow::Result;
use chrono::{DateTime, Utc};
use janus_types::JanusError;
use janus_types::models::{Event, EventWindow, Owner, Participant, Record, Timestamp};
use rusqlite::{Connection, Row};
use tracing::{debug, warn};

/// Shortest event key handed out. Each collision grows the next candidate by one.
pub const EVENT_KEY_MIN_LEN: usize = 8;

/// Collisions tolerated before key generation gives up.
pub const MAX_KEY_ATTEMPTS: u32 = 16;

/// Name given to events created by redeeming a premium claim.
pub const PREMIUM_EVENT_NAME: &str = "Premium Event";

/// Produces a random key of the requested length.
pub type KeyGen<'a> = &'a mut dyn FnMut(usize) -> String;

pub struct NewEvent {
    pub owner_id: i64,
    pub name: String,
    pub window: Option<EventWindow>,
    pub max_value: i64,
    pub is_premium: bool,
}

/// What an edit does to a premium event's window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowEdit {
    #[default]
    Keep,
    Set(EventWindow),
    /// Drop the window; the event is happening from then on.
    Clear,
}

/// Owner-side changes to an event, applied all-or-nothing.
/// Passwords arrive already hashed.
#[derive(Default)]
pub struct EventEdit {
    pub name: Option<String>,
    pub max_value: Option<i64>,
    pub window: WindowEdit,
    pub new_participant: Option<(String, String)>,
    pub password_changes: Vec<(String, String)>,
}

impl Database {
    // -- Owners --

    pub fn create_owner(&self, username: &str, password_hash: &str) -> Result<Owner> {
        self.with_tx(|tx| insert_owner(tx, username, password_hash, Utc::now()))
    }

    /// Usernames are globally unique, so at most one owner matches.
    pub fn find_owner_by_username(&self, username: &str) -> Result<Option<Owner>> {
        self.with_conn(|conn| find_owner_by_username(conn, username))
    }

    pub fn get_owner(&self, id: i64) -> Result<Option<Owner>> {
        self.with_conn(|conn| get_owner(conn, id))
    }

    pub fn touch_owner_authentication(&self, id: i64, at: Timestamp) -> Result<()> {
        self.with_tx(|tx| touch_owner_authentication(tx, id, at))
    }

    pub fn set_owner_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        self.with_tx(|tx| set_owner_password(tx, username, password_hash))
    }

    pub fn list_owners(&self) -> Result<Vec<Owner>> {
        self.with_conn(list_owners)
    }

    pub fn delete_owner(&self, id: i64) -> Result<bool> {
        self.with_tx(|tx| delete_owner(tx, id))
    }

    // -- Events --

    pub fn create_event(&self, new: &NewEvent, key_gen: KeyGen<'_>) -> Result<Event> {
        self.with_tx(|tx| insert_event(tx, new, Utc::now(), key_gen))
    }

    /// Create a free, windowless event unless the owner already holds
    /// `max_free_events` of them. The count and the insert share a transaction.
    pub fn create_free_event(
        &self,
        owner_id: i64,
        name: &str,
        max_free_events: usize,
        key_gen: KeyGen<'_>,
    ) -> Result<Event> {
        self.with_tx(|tx| {
            if count_free_events_for_owner(tx, owner_id)? >= max_free_events {
                return Err(JanusError::LimitReached("free events per owner").into());
            }
            let new = NewEvent {
                owner_id,
                name: name.to_string(),
                window: None,
                max_value: -1,
                is_premium: false,
            };
            insert_event(tx, &new, Utc::now(), key_gen)
        })
    }

    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        self.with_conn(|conn| get_event(conn, id))
    }

    pub fn find_event_by_key(&self, key: &str) -> Result<Option<Event>> {
        self.with_conn(|conn| find_event_by_key(conn, key))
    }

    pub fn list_events_for_owner(&self, owner_id: i64) -> Result<Vec<Event>> {
        self.with_conn(|conn| list_events_for_owner(conn, owner_id))
    }

    pub fn list_event_listing(&self) -> Result<Vec<EventListingRow>> {
        self.with_conn(list_event_listing)
    }

    pub fn count_free_events_for_owner(&self, owner_id: i64) -> Result<usize> {
        self.with_conn(|conn| count_free_events_for_owner(conn, owner_id))
    }

    pub fn set_event_premium(&self, key: &str) -> Result<PremiumChange> {
        self.with_tx(|tx| set_event_premium(tx, key))
    }

    pub fn delete_event(&self, id: i64) -> Result<bool> {
        self.with_tx(|tx| delete_event(tx, id))
    }

    /// Apply every part of `edit` in one transaction. A validation failure or
    /// storage error on any step leaves the event exactly as it was.
    pub fn apply_event_edit(
        &self,
        event_id: i64,
        edit: &EventEdit,
        max_free_participants: usize,
    ) -> Result<()> {
        self.with_tx(|tx| apply_event_edit(tx, event_id, edit, max_free_participants, Utc::now()))
    }

    // -- Participants --

    pub fn create_participant(
        &self,
        event_id: i64,
        username: &str,
        password_hash: &str,
    ) -> Result<Participant> {
        self.with_tx(|tx| insert_participant(tx, event_id, username, password_hash, Utc::now()))
    }

    /// Usernames are unique per event, so at most one participant matches.
    pub fn find_participant_by_event_and_username(
        &self,
        event_id: i64,
        username: &str,
    ) -> Result<Option<Participant>> {
        self.with_conn(|conn| find_participant_by_event_and_username(conn, event_id, username))
    }

    pub fn get_participant(&self, id: i64) -> Result<Option<Participant>> {
        self.with_conn(|conn| get_participant(conn, id))
    }

    pub fn list_participants(&self, event_id: i64) -> Result<Vec<Participant>> {
        self.with_conn(|conn| list_participants(conn, event_id))
    }

    // -- Ledger --

    pub fn list_ledger(&self, event_id: i64) -> Result<Vec<LedgerRow>> {
        self.with_conn(|conn| list_ledger(conn, event_id))
    }

    // -- Premium claims --

    pub fn create_premium_claim(&self, token: &str, owner_id: i64) -> Result<()> {
        self.with_tx(|tx| insert_premium_claim(tx, token, owner_id, Utc::now()))
    }

    /// Consume `owner_id`'s claim token exactly once, creating the premium
    /// event it pays for.
    pub fn redeem_premium_claim(
        &self,
        token: &str,
        owner_id: i64,
        key_gen: KeyGen<'_>,
    ) -> Result<ClaimOutcome> {
        self.with_tx(|tx| redeem_premium_claim(tx, token, owner_id, Utc::now(), key_gen))
    }
}

// -- Time --

pub(crate) fn to_secs(ts: Timestamp) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

pub(crate) fn from_secs(secs: f64) -> Timestamp {
    DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0).round() as i64).unwrap_or_else(
        || {
            warn!("Corrupt timestamp {} in database", secs);
            DateTime::default()
        },
    )
}

// -- Owners --

const OWNER_COLUMNS: &str = "id, username, password, signup_time, last_authentication";

fn owner_from_row(row: &Row<'_>) -> rusqlite::Result<Owner> {
    Ok(Owner {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        signup_time: from_secs(row.get(3)?),
        last_authentication: from_secs(row.get(4)?),
    })
}

pub fn insert_owner(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    now: Timestamp,
) -> Result<Owner> {
    conn.execute(
        "INSERT INTO owners (username, password, signup_time, last_authentication)
         VALUES (?1, ?2, ?3, ?3)",
        rusqlite::params![username, password_hash, to_secs(now)],
    )?;

    Ok(Owner {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        signup_time: now,
        last_authentication: now,
    })
}

pub fn find_owner_by_username(conn: &Connection, username: &str) -> Result<Option<Owner>> {
    let sql = format!("SELECT {OWNER_COLUMNS} FROM owners WHERE username = ?1");
    conn.query_row(&sql, [username], owner_from_row).optional()
}

pub fn get_owner(conn: &Connection, id: i64) -> Result<Option<Owner>> {
    let sql = format!("SELECT {OWNER_COLUMNS} FROM owners WHERE id = ?1");
    conn.query_row(&sql, [id], owner_from_row).optional()
}

pub fn touch_owner_authentication(conn: &Connection, id: i64, at: Timestamp) -> Result<()> {
    conn.execute(
        "UPDATE owners SET last_authentication = ?1 WHERE id = ?2",
        rusqlite::params![to_secs(at), id],
    )?;
    Ok(())
}

pub fn set_owner_password(conn: &Connection, username: &str, password_hash: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE owners SET password = ?1 WHERE username = ?2",
        (password_hash, username),
    )?;
    Ok(changed == 1)
}

/// Least recently authenticated first.
pub fn list_owners(conn: &Connection) -> Result<Vec<Owner>> {
    let sql = format!("SELECT {OWNER_COLUMNS} FROM owners ORDER BY last_authentication, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], owner_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_owner(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM owners WHERE id = ?1", [id])? == 1)
}

// -- Events --

const EVENT_COLUMNS: &str =
    "id, owner_id, name, key, start_time, end_time, max_value, is_premium, created_at, lazy_total";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let start: Option<f64> = row.get(4)?;
    let end: Option<f64> = row.get(5)?;
    let window = match (start, end) {
        (Some(start), Some(end)) => EventWindow::new(from_secs(start), from_secs(end)).ok(),
        _ => None,
    };

    Ok(Event {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        key: row.get(3)?,
        window,
        max_value: row.get(6)?,
        is_premium: row.get(7)?,
        created_at: from_secs(row.get(8)?),
        lazy_total: row.get(9)?,
    })
}

fn key_in_use(conn: &Connection, key: &str) -> Result<bool> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE key = ?1",
        [key],
        |row| row.get(0),
    )?;
    Ok(found > 0)
}

/// Insert an event under a freshly generated unique key.
///
/// Runs inside the caller's transaction, so the uniqueness check and the
/// insert cannot interleave with another writer.
pub fn insert_event(
    conn: &Connection,
    new: &NewEvent,
    now: Timestamp,
    key_gen: KeyGen<'_>,
) -> Result<Event> {
    if new.window.is_some() && !new.is_premium {
        return Err(JanusError::InvalidEventWindow.into());
    }

    for attempt in 0..MAX_KEY_ATTEMPTS {
        let key = key_gen(EVENT_KEY_MIN_LEN + attempt as usize);
        if key_in_use(conn, &key)? {
            debug!("Event key collision on attempt {}", attempt + 1);
            continue;
        }

        conn.execute(
            "INSERT INTO events
                (owner_id, name, key, start_time, end_time, max_value, is_premium, created_at, lazy_total)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            rusqlite::params![
                new.owner_id,
                new.name,
                key,
                new.window.map(|w| to_secs(w.start())),
                new.window.map(|w| to_secs(w.end())),
                new.max_value,
                new.is_premium,
                to_secs(now),
            ],
        )?;

        return Ok(Event {
            id: conn.last_insert_rowid(),
            owner_id: new.owner_id,
            name: new.name.clone(),
            key,
            window: new.window,
            max_value: new.max_value,
            is_premium: new.is_premium,
            created_at: now,
            lazy_total: 0,
        });
    }

    Err(JanusError::DuplicateKeyCollision {
        attempts: MAX_KEY_ATTEMPTS,
    }
    .into())
}

pub fn get_event(conn: &Connection, id: i64) -> Result<Option<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
    conn.query_row(&sql, [id], event_from_row).optional()
}

pub fn find_event_by_key(conn: &Connection, key: &str) -> Result<Option<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE key = ?1");
    conn.query_row(&sql, [key], event_from_row).optional()
}

/// Newest first.
pub fn list_events_for_owner(conn: &Connection, owner_id: i64) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([owner_id], event_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every event, oldest first, with its owner's username when it resolves.
pub fn list_event_listing(conn: &Connection) -> Result<Vec<EventListingRow>> {
    let mut stmt = conn.prepare(
        "SELECT e.key, e.is_premium, o.username
         FROM events e
         LEFT JOIN owners o ON e.owner_id = o.id
         ORDER BY e.created_at, e.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(EventListingRow {
                key: row.get(0)?,
                is_premium: row.get(1)?,
                owner_username: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_free_events_for_owner(conn: &Connection, owner_id: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE owner_id = ?1 AND is_premium = 0",
        [owner_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn set_event_premium(conn: &Connection, key: &str) -> Result<PremiumChange> {
    let Some(event) = find_event_by_key(conn, key)? else {
        return Ok(PremiumChange::NotFound);
    };
    if event.is_premium {
        return Ok(PremiumChange::AlreadyPremium);
    }
    conn.execute("UPDATE events SET is_premium = 1 WHERE id = ?1", [event.id])?;
    Ok(PremiumChange::Upgraded)
}

pub fn delete_event(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.execute("DELETE FROM events WHERE id = ?1", [id])? == 1)
}

pub fn apply_event_edit(
    conn: &Connection,
    event_id: i64,
    edit: &EventEdit,
    max_free_participants: usize,
    now: Timestamp,
) -> Result<()> {
    let event = get_event(conn, event_id)?.ok_or(JanusError::EventNotFound)?;

    if let Some(name) = &edit.name {
        conn.execute("UPDATE events SET name = ?1 WHERE id = ?2", (name, event_id))?;
    }

    if let Some(max_value) = edit.max_value {
        conn.execute(
            "UPDATE events SET max_value = ?1 WHERE id = ?2",
            (max_value, event_id),
        )?;
    }

    if edit.window != WindowEdit::Keep && !event.is_premium {
        return Err(JanusError::InvalidEventWindow.into());
    }
    match edit.window {
        WindowEdit::Keep => {}
        WindowEdit::Set(window) => {
            conn.execute(
                "UPDATE events SET start_time = ?1, end_time = ?2 WHERE id = ?3",
                rusqlite::params![to_secs(window.start()), to_secs(window.end()), event_id],
            )?;
        }
        WindowEdit::Clear => {
            conn.execute(
                "UPDATE events SET start_time = NULL, end_time = NULL WHERE id = ?1",
                [event_id],
            )?;
        }
    }

    if let Some((username, password_hash)) = &edit.new_participant {
        if !event.is_premium && count_participants(conn, event_id)? >= max_free_participants {
            return Err(JanusError::LimitReached("participants per free event").into());
        }
        insert_participant(conn, event_id, username, password_hash, now)?;
    }

    for (username, password_hash) in &edit.password_changes {
        if !set_participant_password(conn, event_id, username, password_hash)? {
            return Err(JanusError::ParticipantNotFound.into());
        }
    }

    Ok(())
}

// -- Participants --

const PARTICIPANT_COLUMNS: &str = "id, event_id, username, password, created_at";

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        event_id: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: from_secs(row.get(4)?),
    })
}

pub fn insert_participant(
    conn: &Connection,
    event_id: i64,
    username: &str,
    password_hash: &str,
    now: Timestamp,
) -> Result<Participant> {
    conn.execute(
        "INSERT INTO participants (event_id, username, password, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![event_id, username, password_hash, to_secs(now)],
    )?;

    Ok(Participant {
        id: conn.last_insert_rowid(),
        event_id,
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        created_at: now,
    })
}

pub fn find_participant_by_event_and_username(
    conn: &Connection,
    event_id: i64,
    username: &str,
) -> Result<Option<Participant>> {
    let sql =
        format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = ?1 AND username = ?2");
    conn.query_row(&sql, rusqlite::params![event_id, username], participant_from_row)
        .optional()
}

pub fn get_participant(conn: &Connection, id: i64) -> Result<Option<Participant>> {
    let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1");
    conn.query_row(&sql, [id], participant_from_row).optional()
}

/// Oldest first.
pub fn list_participants(conn: &Connection, event_id: i64) -> Result<Vec<Participant>> {
    let sql = format!(
        "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = ?1 ORDER BY created_at, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([event_id], participant_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_participants(conn: &Connection, event_id: i64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM participants WHERE event_id = ?1",
        [event_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn set_participant_password(
    conn: &Connection,
    event_id: i64,
    username: &str,
    password_hash: &str,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE participants SET password = ?1 WHERE event_id = ?2 AND username = ?3",
        rusqlite::params![password_hash, event_id, username],
    )?;
    Ok(changed == 1)
}

// -- Counter --

/// Atomically add `delta` to the event's lazy counter.
/// Returns `false` if the event does not exist.
pub fn increment_lazy_total(conn: &Connection, event_id: i64, delta: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE events SET lazy_total = lazy_total + ?1 WHERE id = ?2",
        (delta, event_id),
    )?;
    Ok(changed == 1)
}

pub fn lazy_total(conn: &Connection, event_id: i64) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT lazy_total FROM events WHERE id = ?1",
        [event_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn insert_record(conn: &Connection, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT INTO records (participant_id, event_id, time, value) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            record.participant_id,
            record.event_id,
            to_secs(record.time),
            record.value
        ],
    )?;
    Ok(())
}

/// Sum of the event's record values, restricted to `window` when given.
/// An empty ledger sums to zero.
pub fn sum_records(conn: &Connection, event_id: i64, window: Option<&EventWindow>) -> Result<i64> {
    let sum = match window {
        Some(window) => conn.query_row(
            "SELECT COALESCE(SUM(value), 0) FROM records
             WHERE event_id = ?1 AND time >= ?2 AND time <= ?3",
            rusqlite::params![event_id, to_secs(window.start()), to_secs(window.end())],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COALESCE(SUM(value), 0) FROM records WHERE event_id = ?1",
            [event_id],
            |row| row.get(0),
        )?,
    };
    Ok(sum)
}

/// Every record of the event in timestamp order, with usernames resolved.
pub fn list_ledger(conn: &Connection, event_id: i64) -> Result<Vec<LedgerRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.time, p.username, r.value
         FROM records r
         LEFT JOIN participants p ON r.participant_id = p.id
         WHERE r.event_id = ?1
         ORDER BY r.time, r.participant_id",
    )?;
    let rows = stmt
        .query_map([event_id], |row| {
            Ok(LedgerRow {
                time: from_secs(row.get(0)?),
                username: row.get(1)?,
                value: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// -- Premium claims --

pub fn insert_premium_claim(
    conn: &Connection,
    token: &str,
    owner_id: i64,
    now: Timestamp,
) -> Result<()> {
    conn.execute(
        "INSERT INTO premium_claims (token, owner_id, created_at, used) VALUES (?1, ?2, ?3, 0)",
        rusqlite::params![token, owner_id, to_secs(now)],
    )?;
    Ok(())
}

pub fn redeem_premium_claim(
    conn: &Connection,
    token: &str,
    owner_id: i64,
    now: Timestamp,
    key_gen: KeyGen<'_>,
) -> Result<ClaimOutcome> {
    let pending: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM premium_claims WHERE token = ?1 AND owner_id = ?2 AND used = 0",
            rusqlite::params![token, owner_id],
            |row| row.get(0),
        )
        .optional()?;

    if pending.is_none() {
        return Ok(ClaimOutcome::Unknown);
    }
    conn.execute("UPDATE premium_claims SET used = 1 WHERE token = ?1", [token])?;

    let event = insert_event(
        conn,
        &NewEvent {
            owner_id,
            name: PREMIUM_EVENT_NAME.to_string(),
            window: None,
            max_value: -1,
            is_premium: true,
        },
        now,
        key_gen,
    )?;
    Ok(ClaimOutcome::Redeemed(event))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
