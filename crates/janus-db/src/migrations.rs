use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE owners (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                username            TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                signup_time         REAL NOT NULL,
                last_authentication REAL NOT NULL
            );

            CREATE TABLE events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id    INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
                name        TEXT NOT NULL,
                key         TEXT NOT NULL UNIQUE,
                start_time  REAL,
                end_time    REAL,
                max_value   INTEGER NOT NULL DEFAULT -1,
                is_premium  INTEGER NOT NULL DEFAULT 0,
                created_at  REAL NOT NULL,
                lazy_total  INTEGER NOT NULL DEFAULT 0,
                CHECK ((start_time IS NULL) = (end_time IS NULL)),
                CHECK (end_time IS NULL OR end_time > start_time)
            );

            CREATE INDEX idx_events_owner ON events(owner_id, created_at);

            CREATE TABLE participants (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id    INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                username    TEXT NOT NULL,
                password    TEXT NOT NULL,
                created_at  REAL NOT NULL,
                UNIQUE(event_id, username)
            );

            CREATE TABLE records (
                participant_id  INTEGER NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
                event_id        INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
                time            REAL NOT NULL,
                value           INTEGER NOT NULL CHECK (value IN (-1, 1)),
                PRIMARY KEY (participant_id, time)
            );

            CREATE INDEX idx_records_event ON records(event_id, time);

            CREATE TABLE premium_claims (
                token       TEXT PRIMARY KEY,
                owner_id    INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
                created_at  REAL NOT NULL,
                used        INTEGER NOT NULL DEFAULT 0
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
