pub mod prices;
pub mod session_keys;
pub mod strategies;
pub mod tx_logs;
pub mod users;
pub mod wallets;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

pub type Db = Arc<Mutex<Connection>>;

pub fn open(path: &std::path::Path) -> Result<Db> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("creating db directory")?;
        }
    }

    let conn = Connection::open(path)
        .with_context(|| format!("opening sqlite at {}", path.display()))?;

    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory store for tests and throwaway runs.
pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory().context("opening in-memory sqlite")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrate(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            external_identity_id  TEXT UNIQUE NOT NULL,
            email                 TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS wallets (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id                INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            chain                  TEXT NOT NULL,
            owner_address          TEXT NOT NULL,
            smart_account_address  TEXT,
            UNIQUE(user_id, chain)
        );

        CREATE TABLE IF NOT EXISTS session_keys (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            public_key   TEXT UNIQUE NOT NULL,
            permissions  TEXT NOT NULL DEFAULT '{}',
            expires_at   INTEGER,
            is_active    INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS strategies (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name        TEXT NOT NULL,
            definition  TEXT NOT NULL,
            schedule    TEXT,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch() * 1000)
        );

        CREATE TABLE IF NOT EXISTS price_samples (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chain      TEXT NOT NULL,
            address    TEXT NOT NULL,
            symbol     TEXT NOT NULL,
            price_usd  REAL NOT NULL,
            source     TEXT NOT NULL,
            timestamp  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_price_samples_lookup
            ON price_samples (chain, address, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_price_samples_chain
            ON price_samples (chain, timestamp DESC);

        CREATE TABLE IF NOT EXISTS transaction_logs (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            strategy_id  INTEGER REFERENCES strategies(id) ON DELETE SET NULL,
            description  TEXT NOT NULL,
            tx_hash      TEXT,
            chain        TEXT,
            status       TEXT NOT NULL,
            details      TEXT NOT NULL DEFAULT '{}',
            created_at   INTEGER NOT NULL DEFAULT (unixepoch() * 1000)
        );
        CREATE INDEX IF NOT EXISTS idx_tx_logs_idempotency
            ON transaction_logs (json_extract(details, '$.idempotencyKey'));
        ",
    )?;
    Ok(())
}

// ── Timestamp helpers ────────────────────────────────────────────────

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
