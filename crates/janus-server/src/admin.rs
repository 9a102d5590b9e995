//! One-shot administrative commands run against the database directly.

use std::io::Write;

use anyhow::{Context, bail};
use chrono::Utc;

use janus_auth::{CredentialHasher, keys};
use janus_db::Database;
use janus_db::models::PremiumChange;

/// Printed instead of an owner name that cannot be resolved.
const UNRESOLVED_OWNER: &str = "<ERROR>";

pub fn set_premium(db: &Database, event_key: &str, out: &mut impl Write) -> anyhow::Result<()> {
    match db.set_event_premium(event_key)? {
        PremiumChange::Upgraded => writeln!(out, "Success")?,
        PremiumChange::AlreadyPremium => bail!("Event with key {} was already premium.", event_key),
        PremiumChange::NotFound => bail!("Event with key {} was not found.", event_key),
    }
    Ok(())
}

pub fn set_password(
    db: &Database,
    hasher: &dyn CredentialHasher,
    username: &str,
    password: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let hash = hasher.hash(password)?;
    if !db.set_owner_password(username, &hash)? {
        bail!("User with username {} was not found.", username);
    }
    writeln!(out, "Success")?;
    Ok(())
}

/// Owners, least recently authenticated first.
pub fn list_users(db: &Database, out: &mut impl Write) -> anyhow::Result<()> {
    let now = Utc::now();
    for owner in db.list_owners()? {
        let days = (now - owner.last_authentication).num_seconds() as f64 / 86_400.0;
        writeln!(
            out,
            "Username, Days Since Login:\t\t{}\t\t{:.1}",
            owner.username, days
        )?;
    }
    Ok(())
}

/// Every event, oldest first. An owner that cannot be resolved prints as
/// `<ERROR>` rather than aborting the listing.
pub fn list_events(db: &Database, out: &mut impl Write) -> anyhow::Result<()> {
    for row in db.list_event_listing()? {
        writeln!(
            out,
            "Owner, Key, Premium:\t\t{}\t\t{}\t\t{}",
            row.owner_username.as_deref().unwrap_or(UNRESOLVED_OWNER),
            row.key,
            row.is_premium
        )?;
    }
    Ok(())
}

/// Issue a one-time premium claim for `username` once payment has cleared.
pub fn create_claim(db: &Database, username: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let owner = db
        .find_owner_by_username(username)?
        .with_context(|| format!("User with username {} was not found.", username))?;
    let token = keys::generate_token();
    db.create_premium_claim(&token, owner.id)?;
    writeln!(out, "{}", token)?;
    Ok(())
}
