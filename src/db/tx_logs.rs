use rusqlite::params;
use serde_json::Value;

use crate::error::FlowResult;
use crate::model::entity::{TransactionLog, TxStatus};

use super::{Db, ms_to_datetime, now_ms};

/// Fields for a new log row; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewTransactionLog {
    pub user_id: i64,
    pub strategy_id: Option<i64>,
    pub description: String,
    pub tx_hash: Option<String>,
    pub chain: Option<String>,
    pub status: TxStatus,
    pub details: Value,
}

pub async fn insert(db: &Db, log: NewTransactionLog) -> FlowResult<TransactionLog> {
    let conn = db.lock().await;
    let details = serde_json::to_string(&log.details)?;
    let created_at = now_ms();
    conn.execute(
        "INSERT INTO transaction_logs
            (user_id, strategy_id, description, tx_hash, chain, status, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            log.user_id,
            log.strategy_id,
            log.description,
            log.tx_hash,
            log.chain,
            log.status.as_str(),
            details,
            created_at,
        ],
    )?;
    Ok(TransactionLog {
        id: conn.last_insert_rowid(),
        user_id: log.user_id,
        strategy_id: log.strategy_id,
        description: log.description,
        tx_hash: log.tx_hash,
        chain: log.chain,
        status: log.status,
        details: log.details,
        created_at: ms_to_datetime(created_at),
    })
}

/// Look up a previous attempt by the idempotency key stored in `details`.
/// Rows written without `details` are ignored — `details` is authoritative.
/// Approval rows share the key with their main transaction for audit
/// correlation and are excluded here.
pub async fn find_by_idempotency_key(db: &Db, key: &str) -> FlowResult<Option<TransactionLog>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, strategy_id, description, tx_hash, chain, status, details, created_at
         FROM transaction_logs
         WHERE json_extract(details, '$.idempotencyKey') = ?1
           AND COALESCE(json_extract(details, '$.kind'), 'execution') != 'approval'
         ORDER BY id
         LIMIT 1",
    )?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(log_from_row(row)?)),
        None => Ok(None),
    }
}

pub async fn for_strategy(db: &Db, strategy_id: i64) -> FlowResult<Vec<TransactionLog>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, user_id, strategy_id, description, tx_hash, chain, status, details, created_at
         FROM transaction_logs
         WHERE strategy_id = ?1
         ORDER BY id",
    )?;
    let mut rows = stmt.query(params![strategy_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(log_from_row(row)?);
    }
    Ok(out)
}

fn log_from_row(row: &rusqlite::Row<'_>) -> FlowResult<TransactionLog> {
    let status: String = row.get(6)?;
    let details_raw: String = row.get(7)?;
    Ok(TransactionLog {
        id: row.get(0)?,
        user_id: row.get(1)?,
        strategy_id: row.get(2)?,
        description: row.get(3)?,
        tx_hash: row.get(4)?,
        chain: row.get(5)?,
        status: TxStatus::parse(&status).unwrap_or(TxStatus::Failed),
        details: serde_json::from_str(&details_raw).unwrap_or(Value::Null),
        created_at: ms_to_datetime(row.get(8)?),
    })
}
