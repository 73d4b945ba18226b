use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::Network;
use crate::models::{Chain, ScanStatus};

use super::error::StoreResult;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanStateRow {
    pub chain: Chain,
    pub network: Network,
    pub last_scanned_index: i64,
    pub max_scan_id: i64,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn get(conn: &Connection, chain: Chain, network: Network) -> StoreResult<Option<ScanStateRow>> {
    conn.query_row(
        "SELECT chain, network, last_scanned_index, max_scan_id, status, started_at, updated_at \
         FROM scan_state WHERE chain = ?1 AND network = ?2",
        params![chain.to_string(), network.as_str()],
        row_to_scan_state,
    )
    .optional()
    .map_err(Into::into)
}

/// Upserts the checkpoint. Called either inside the same transaction as a
/// batch of balance upserts (the common case) or standalone when a batch
/// produced no balance writes.
pub fn upsert(
    conn: &Connection,
    chain: Chain,
    network: Network,
    last_scanned_index: i64,
    max_scan_id: i64,
    status: ScanStatus,
    started_at: DateTime<Utc>,
) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO scan_state (chain, network, last_scanned_index, max_scan_id, status, started_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT (chain, network) DO UPDATE SET \
           last_scanned_index = excluded.last_scanned_index, \
           max_scan_id = excluded.max_scan_id, \
           status = excluded.status, \
           updated_at = excluded.updated_at",
        params![
            chain.to_string(),
            network.as_str(),
            last_scanned_index,
            max_scan_id,
            status.to_string(),
            started_at.to_rfc3339(),
            now
        ],
    )?;
    Ok(())
}

fn row_to_scan_state(row: &rusqlite::Row) -> rusqlite::Result<ScanStateRow> {
    let chain_str: String = row.get(0)?;
    let network_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let started_at_str: String = row.get(5)?;
    let updated_at_str: String = row.get(6)?;

    Ok(ScanStateRow {
        chain: chain_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into()))?,
        network: if network_str == "mainnet" {
            Network::Mainnet
        } else {
            Network::Testnet
        },
        last_scanned_index: row.get(2)?,
        max_scan_id: row.get(3)?,
        status: status_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into()))?,
        started_at: DateTime::parse_from_rfc3339(&started_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn upsert_then_read_back() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        let started = Utc::now();
        upsert(&conn, Chain::Sol, Network::Testnet, 0, 100, ScanStatus::Scanning, started).unwrap();
        upsert(&conn, Chain::Sol, Network::Testnet, 50, 100, ScanStatus::Scanning, started).unwrap();

        let row = get(&conn, Chain::Sol, Network::Testnet).unwrap().unwrap();
        assert_eq!(row.last_scanned_index, 50);
        assert_eq!(row.status, ScanStatus::Scanning);
    }

    #[test]
    fn missing_scan_state_is_none() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        assert!(get(&conn, Chain::Sol, Network::Mainnet).unwrap().is_none());
    }
}
