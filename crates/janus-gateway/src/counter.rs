use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use chrono::Utc;
use rusqlite::Connection;

use janus_db::Database;
use janus_db::queries;
use janus_types::models::{Delta, Event, Record, Timestamp};
use janus_types::{JanusError, JanusResult};

/// Label of the synthetic ledger entry standing in for lazily counted updates.
pub const UNDETAILED_LABEL: &str = "Undetailed Records";
/// Label for records whose participant no longer exists.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// One line of an exported ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// `None` for the synthetic undetailed entry, exported as timestamp 0.
    pub time: Option<Timestamp>,
    pub label: String,
    pub value: i64,
}

/// Applies counter updates and derives totals.
///
/// Free events keep a single running number. Premium events append one record
/// per update and derive the total from the records that fall inside the
/// event window, plus whatever was counted before the upgrade.
pub struct EventCounter {
    db: Arc<Database>,
}

impl EventCounter {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn apply_update(&self, event: &Event, participant_id: i64, delta: i64) -> JanusResult<i64> {
        self.apply_update_at(event, participant_id, delta, Utc::now())
    }

    /// Apply one `delta` by `participant_id` at `now` and return the total
    /// that results from it. The write and the read share one transaction.
    pub fn apply_update_at(
        &self,
        event: &Event,
        participant_id: i64,
        delta: i64,
        now: Timestamp,
    ) -> JanusResult<i64> {
        self.apply(event.id, participant_id, delta, now, None)
    }

    /// Like `apply_update_at`, but the transaction rolls back instead of
    /// committing once `deadline` has passed, so a caller that gave up waiting
    /// never leaves a write behind.
    pub fn apply_update_before(
        &self,
        event_id: i64,
        participant_id: i64,
        delta: i64,
        now: Timestamp,
        deadline: Instant,
    ) -> JanusResult<i64> {
        self.apply(event_id, participant_id, delta, now, Some(deadline))
    }

    fn apply(
        &self,
        event_id: i64,
        participant_id: i64,
        delta: i64,
        now: Timestamp,
        deadline: Option<Instant>,
    ) -> JanusResult<i64> {
        let delta = Delta::try_from(delta)?;

        let total = self.db.with_tx(|tx| {
            // Tier and window are read under the write lock; an upgrade or
            // window edit cannot slip in between the check and the write.
            let event = queries::get_event(tx, event_id)?.ok_or(JanusError::EventNotFound)?;
            if !event.is_happening_at(now) {
                return Err(JanusError::EventNotOpen.into());
            }

            if event.is_premium {
                queries::insert_record(
                    tx,
                    &Record {
                        event_id,
                        participant_id,
                        time: now,
                        value: delta.value(),
                    },
                )?;
            } else if !queries::increment_lazy_total(tx, event_id, delta.value())? {
                return Err(JanusError::EventNotFound.into());
            }
            let total = total_in(tx, &event)?;

            if deadline.is_some_and(|deadline| Instant::now() > deadline) {
                bail!("storage deadline passed before commit");
            }
            Ok(total)
        })?;
        Ok(total)
    }

    pub fn compute_total(&self, event: &Event) -> JanusResult<i64> {
        Ok(self.db.with_conn(|conn| total_in(conn, event))?)
    }

    /// The exportable ledger of a premium event. A non-zero lazy counter shows
    /// up first, as a single undetailed entry.
    pub fn ledger(&self, event: &Event) -> JanusResult<Vec<LedgerEntry>> {
        let (lazy, rows) = self.db.with_conn(|conn| {
            let lazy = queries::lazy_total(conn, event.id)?.ok_or(JanusError::EventNotFound)?;
            Ok((lazy, queries::list_ledger(conn, event.id)?))
        })?;

        let mut entries = Vec::with_capacity(rows.len() + 1);
        if lazy != 0 {
            entries.push(LedgerEntry {
                time: None,
                label: UNDETAILED_LABEL.to_string(),
                value: lazy,
            });
        }
        entries.extend(rows.into_iter().map(|row| LedgerEntry {
            time: Some(row.time),
            label: row.username.unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
            value: row.value,
        }));
        Ok(entries)
    }
}

fn total_in(conn: &Connection, event: &Event) -> anyhow::Result<i64> {
    let lazy = queries::lazy_total(conn, event.id)?.ok_or(JanusError::EventNotFound)?;
    if !event.is_premium {
        return Ok(lazy);
    }
    Ok(lazy + queries::sum_records(conn, event.id, event.window.as_ref())?)
}
