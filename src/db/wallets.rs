use rusqlite::params;

use crate::error::FlowResult;
use crate::model::entity::Wallet;

use super::Db;

pub async fn insert(
    db: &Db,
    user_id: i64,
    chain: &str,
    owner_address: &str,
    smart_account_address: Option<&str>,
) -> FlowResult<i64> {
    let conn = db.lock().await;
    conn.execute(
        "INSERT INTO wallets (user_id, chain, owner_address, smart_account_address)
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, chain, owner_address, smart_account_address],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The wallet for `(userId, chain)` — unique by schema.
pub async fn for_user_chain(db: &Db, user_id: i64, chain: &str) -> FlowResult<Option<Wallet>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, chain, owner_address, smart_account_address
         FROM wallets WHERE user_id = ?1 AND chain = ?2",
    )?;
    let mut rows = stmt.query(params![user_id, chain])?;
    match rows.next()? {
        Some(row) => Ok(Some(Wallet {
            id: row.get(0)?,
            user_id: row.get(1)?,
            chain: row.get(2)?,
            owner_address: row.get(3)?,
            smart_account_address: row.get(4)?,
        })),
        None => Ok(None),
    }
}
