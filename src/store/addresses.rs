use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::Network;
use crate::models::Chain;

use super::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub chain: Chain,
    pub network: Network,
    pub index: i64,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

/// Inserts a newly derived address. Fails with `DuplicateEntry` if the
/// `(chain, network, index)` key already exists.
pub fn insert(conn: &Connection, chain: Chain, network: Network, index: i64, address: &str) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    let result = conn.execute(
        "INSERT INTO addresses (chain, network, address_index, address, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![chain.to_string(), network.as_str(), index, address, now],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => Err(
            StoreError::DuplicateEntry(format!("address {}/{}/{} already exists", chain, network.as_str(), index)),
        ),
        Err(e) => Err(e.into()),
    }
}

pub fn get_by_index(conn: &Connection, chain: Chain, network: Network, index: i64) -> StoreResult<Option<Address>> {
    conn.query_row(
        "SELECT chain, network, address_index, address, created_at FROM addresses \
         WHERE chain = ?1 AND network = ?2 AND address_index = ?3",
        params![chain.to_string(), network.as_str(), index],
        row_to_address,
    )
    .optional()
    .map_err(StoreError::from)
}

/// Loads the dense `[start, end)` window of addresses for a chain/network,
/// ordered by index. Used by the scan loop to pull one batch.
pub fn list_range(
    conn: &Connection,
    chain: Chain,
    network: Network,
    start: i64,
    end: i64,
) -> StoreResult<Vec<Address>> {
    let mut stmt = conn.prepare(
        "SELECT chain, network, address_index, address, created_at FROM addresses \
         WHERE chain = ?1 AND network = ?2 AND address_index >= ?3 AND address_index < ?4 \
         ORDER BY address_index ASC",
    )?;
    let rows = stmt
        .query_map(params![chain.to_string(), network.as_str(), start, end], row_to_address)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn max_index(conn: &Connection, chain: Chain, network: Network) -> StoreResult<Option<i64>> {
    conn.query_row(
        "SELECT max(address_index) FROM addresses WHERE chain = ?1 AND network = ?2",
        params![chain.to_string(), network.as_str()],
        |row| row.get(0),
    )
    .map_err(StoreError::from)
}

/// Fails fast if any persisted address string does not match the
/// configured network's expected prefix, per the startup consistency check.
pub fn verify_network_consistency(conn: &Connection, chain: Chain, network: Network) -> StoreResult<()> {
    let mismatched: i64 = match (chain, network) {
        (Chain::Btc, Network::Mainnet) => conn.query_row(
            "SELECT count(*) FROM addresses WHERE chain = 'BTC' AND network = 'mainnet' AND address NOT LIKE 'bc1%'",
            [],
            |row| row.get(0),
        )?,
        (Chain::Btc, Network::Testnet) => conn.query_row(
            "SELECT count(*) FROM addresses WHERE chain = 'BTC' AND network = 'testnet' AND address NOT LIKE 'tb1%'",
            [],
            |row| row.get(0),
        )?,
        _ => 0,
    };

    if mismatched > 0 {
        return Err(StoreError::NetworkMismatch(format!(
            "{} address(es) on chain {} do not match network {}",
            mismatched,
            chain,
            network.as_str()
        )));
    }
    Ok(())
}

fn row_to_address(row: &rusqlite::Row) -> rusqlite::Result<Address> {
    let chain_str: String = row.get(0)?;
    let network_str: String = row.get(1)?;
    let created_at_str: String = row.get(4)?;

    Ok(Address {
        chain: chain_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })?,
        network: if network_str == "mainnet" {
            Network::Mainnet
        } else {
            Network::Testnet
        },
        index: row.get(2)?,
        address: row.get(3)?,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn insert_and_fetch_roundtrip() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        insert(&conn, Chain::Btc, Network::Testnet, 0, "tb1qexample").unwrap();

        let found = get_by_index(&conn, Chain::Btc, Network::Testnet, 0).unwrap().unwrap();
        assert_eq!(found.address, "tb1qexample");
        assert_eq!(found.index, 0);
    }

    #[test]
    fn duplicate_index_rejected() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        insert(&conn, Chain::Btc, Network::Testnet, 0, "tb1qone").unwrap();
        let err = insert(&conn, Chain::Btc, Network::Testnet, 0, "tb1qtwo").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntry(_)));
    }

    #[test]
    fn list_range_is_ordered_and_bounded() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        for i in 0..5 {
            insert(&conn, Chain::Btc, Network::Testnet, i, &format!("tb1q{}", i)).unwrap();
        }
        let batch = list_range(&conn, Chain::Btc, Network::Testnet, 1, 3).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].index, 1);
        assert_eq!(batch[1].index, 2);
    }

    #[test]
    fn network_mismatch_is_detected() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        insert(&conn, Chain::Btc, Network::Testnet, 0, "bc1qmainnetlooking").unwrap();
        let err = verify_network_consistency(&conn, Chain::Btc, Network::Testnet).unwrap_err();
        assert!(matches!(err, StoreError::NetworkMismatch(_)));
    }
}
