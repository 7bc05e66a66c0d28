use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::error::FlowResult;
use crate::model::entity::{KeyPermissions, SessionKey};

use super::{Db, ms_to_datetime};

pub async fn insert(
    db: &Db,
    user_id: i64,
    public_key: &str,
    permissions: &KeyPermissions,
    expires_at: Option<DateTime<Utc>>,
) -> FlowResult<i64> {
    let conn = db.lock().await;
    let perms = serde_json::to_string(permissions)?;
    conn.execute(
        "INSERT INTO session_keys (user_id, public_key, permissions, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            user_id,
            public_key,
            perms,
            expires_at.map(|t| t.timestamp_millis())
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub async fn get(db: &Db, id: i64) -> FlowResult<Option<SessionKey>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, public_key, permissions, expires_at, is_active
         FROM session_keys WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => {
            let perms_raw: String = row.get(3)?;
            let permissions: KeyPermissions = serde_json::from_str(&perms_raw)?;
            Ok(Some(SessionKey {
                id: row.get(0)?,
                user_id: row.get(1)?,
                public_key: row.get(2)?,
                permissions,
                expires_at: row.get::<_, Option<i64>>(4)?.map(ms_to_datetime),
                is_active: row.get::<_, i64>(5)? != 0,
            }))
        }
        None => Ok(None),
    }
}

pub async fn deactivate(db: &Db, id: i64) -> FlowResult<()> {
    let conn = db.lock().await;
    conn.execute(
        "UPDATE session_keys SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}
