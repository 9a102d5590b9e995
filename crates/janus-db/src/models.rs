//! Row shapes for joined or listing queries that have no domain model of
//! their own. Single-table reads map straight into `janus_types::models`.

use janus_types::models::{Event, Timestamp};

/// A ledger record joined with its participant's username.
/// `username` is `None` when the participant row no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub time: Timestamp,
    pub username: Option<String>,
    pub value: i64,
}

/// One line of the administrative event listing.
#[derive(Debug, Clone)]
pub struct EventListingRow {
    pub key: String,
    pub is_premium: bool,
    pub owner_username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PremiumChange {
    Upgraded,
    AlreadyPremium,
    NotFound,
}

/// Outcome of redeeming a one-time premium claim token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Redeemed(Event),
    Unknown,
}
