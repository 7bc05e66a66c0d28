use rusqlite::params;

use crate::error::FlowResult;
use crate::model::entity::User;

use super::Db;

pub async fn insert(db: &Db, external_identity_id: &str, email: &str) -> FlowResult<i64> {
    let conn = db.lock().await;
    conn.execute(
        "INSERT INTO users (external_identity_id, email) VALUES (?1, ?2)",
        params![external_identity_id, email],
    )?;
    Ok(conn.last_insert_rowid())
}

pub async fn get(db: &Db, id: i64) -> FlowResult<Option<User>> {
    let conn = db.lock().await;
    let mut stmt =
        conn.prepare("SELECT id, external_identity_id, email FROM users WHERE id = ?1")?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(User {
            id: row.get(0)?,
            external_identity_id: row.get(1)?,
            email: row.get(2)?,
        })),
        None => Ok(None),
    }
}
