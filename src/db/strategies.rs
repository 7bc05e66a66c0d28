use rusqlite::params;

use crate::error::{FlowError, FlowResult};
use crate::model::definition::{StrategyDefinition, parse_definition};
use crate::model::entity::Strategy;

use super::{Db, ms_to_datetime};

pub async fn insert(
    db: &Db,
    user_id: i64,
    name: &str,
    definition: &StrategyDefinition,
    schedule: Option<&str>,
) -> FlowResult<i64> {
    let conn = db.lock().await;
    let json = serde_json::to_string(definition)?;
    conn.execute(
        "INSERT INTO strategies (user_id, name, definition, schedule) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, name, json, schedule],
    )?;
    Ok(conn.last_insert_rowid())
}

pub async fn get(db: &Db, id: i64) -> FlowResult<Option<Strategy>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, definition, schedule, is_active, created_at
         FROM strategies WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(strategy_from_row(row)?)),
        None => Ok(None),
    }
}

/// All strategies the scheduler should be ticking.
pub async fn active(db: &Db) -> FlowResult<Vec<Strategy>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, definition, schedule, is_active, created_at
         FROM strategies WHERE is_active = 1 ORDER BY id",
    )?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(strategy_from_row(row)?);
    }
    Ok(out)
}

pub async fn set_active(db: &Db, id: i64, is_active: bool) -> FlowResult<()> {
    let conn = db.lock().await;
    let affected = conn.execute(
        "UPDATE strategies SET is_active = ?2 WHERE id = ?1",
        params![id, is_active],
    )?;
    if affected == 0 {
        return Err(FlowError::NotFound(format!("strategy {id}")));
    }
    Ok(())
}

fn strategy_from_row(row: &rusqlite::Row<'_>) -> FlowResult<Strategy> {
    let raw: String = row.get(3)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    // Stored definitions are canonical, but rows written before the
    // trigger/intent split still carry the flat form.
    let definition = parse_definition(&value)?;
    Ok(Strategy {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        definition,
        schedule: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: ms_to_datetime(row.get(6)?),
    })
}
