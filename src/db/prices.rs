use rusqlite::params;

use crate::error::FlowResult;
use crate::model::entity::{PriceFeed, PriceSample};

use super::{Db, ms_to_datetime, now_ms};

/// Append one sample. Timestamp resolution is insertion time; duplicate
/// `(chain, address, timestamp)` rows are acceptable. Chain and address are
/// stored lower-cased so checksummed and venue-cased spellings hit the same
/// rows.
pub async fn insert(
    db: &Db,
    chain: &str,
    address: &str,
    symbol: &str,
    price_usd: f64,
    source: PriceFeed,
) -> FlowResult<i64> {
    let conn = db.lock().await;
    conn.execute(
        "INSERT INTO price_samples (chain, address, symbol, price_usd, source, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            chain.to_lowercase(),
            address.to_lowercase(),
            symbol,
            price_usd,
            source.as_str(),
            now_ms()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent sample for `(chain, address)`, newest first by timestamp then
/// insertion order (sub-millisecond inserts tie on timestamp). Lookups are
/// lower-cased to match the stored normalisation, so a checksummed trigger
/// address finds samples ingested in any casing.
pub async fn latest(db: &Db, chain: &str, address: &str) -> FlowResult<Option<PriceSample>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, chain, address, symbol, price_usd, source, timestamp
         FROM price_samples
         WHERE chain = ?1 AND address = ?2
         ORDER BY timestamp DESC, id DESC
         LIMIT 1",
    )?;
    let mut rows = stmt.query_map(
        params![chain.to_lowercase(), address.to_lowercase()],
        sample_from_row,
    )?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

/// Up to `limit` recent samples for a chain in descending time order.
/// Feeds the trend trigger's top-N window.
pub async fn recent_for_chain(db: &Db, chain: &str, limit: u32) -> FlowResult<Vec<PriceSample>> {
    let conn = db.lock().await;
    let mut stmt = conn.prepare(
        "SELECT id, chain, address, symbol, price_usd, source, timestamp
         FROM price_samples
         WHERE chain = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![chain.to_lowercase(), limit], sample_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn sample_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PriceSample> {
    let source: String = row.get(5)?;
    Ok(PriceSample {
        id: row.get(0)?,
        chain: row.get(1)?,
        address: row.get(2)?,
        symbol: row.get(3)?,
        price_usd: row.get(4)?,
        source: PriceFeed::parse(&source).unwrap_or(PriceFeed::DexAggregator),
        timestamp: ms_to_datetime(row.get(6)?),
    })
}
