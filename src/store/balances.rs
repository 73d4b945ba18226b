use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::config::Network;
use crate::models::{Chain, TokenSymbol};

use super::error::StoreResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub chain: Chain,
    pub network: Network,
    pub index: i64,
    pub token: TokenSymbol,
    pub amount: String,
    pub last_scanned: DateTime<Utc>,
}

/// Upserts one balance row. Called inside the scan loop's checkpoint
/// transaction — never commits on its own.
pub fn upsert(
    conn: &Connection,
    chain: Chain,
    network: Network,
    index: i64,
    token: TokenSymbol,
    amount: &str,
    last_scanned: DateTime<Utc>,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO balances (chain, network, address_index, token, amount, last_scanned) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (chain, network, address_index, token) \
         DO UPDATE SET amount = excluded.amount, last_scanned = excluded.last_scanned",
        params![
            chain.to_string(),
            network.as_str(),
            index,
            token.to_string(),
            amount,
            last_scanned.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn get(
    conn: &Connection,
    chain: Chain,
    network: Network,
    index: i64,
    token: TokenSymbol,
) -> StoreResult<Option<Balance>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT chain, network, address_index, token, amount, last_scanned FROM balances \
         WHERE chain = ?1 AND network = ?2 AND address_index = ?3 AND token = ?4",
        params![chain.to_string(), network.as_str(), index, token.to_string()],
        row_to_balance,
    )
    .optional()
    .map_err(Into::into)
}

/// Every funded (positive NATIVE balance) address for a chain/network, used
/// by the sweep engines to decide what to collect.
pub fn list_funded_native(conn: &Connection, chain: Chain, network: Network) -> StoreResult<Vec<Balance>> {
    let mut stmt = conn.prepare(
        "SELECT chain, network, address_index, token, amount, last_scanned FROM balances \
         WHERE chain = ?1 AND network = ?2 AND token = 'NATIVE' AND amount != '0' \
         ORDER BY address_index ASC",
    )?;
    let rows = stmt
        .query_map(params![chain.to_string(), network.as_str()], row_to_balance)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_balance(row: &rusqlite::Row) -> rusqlite::Result<Balance> {
    let chain_str: String = row.get(0)?;
    let network_str: String = row.get(1)?;
    let token_str: String = row.get(3)?;
    let last_scanned_str: String = row.get(5)?;

    Ok(Balance {
        chain: chain_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into()))?,
        network: if network_str == "mainnet" {
            Network::Mainnet
        } else {
            Network::Testnet
        },
        index: row.get(2)?,
        token: token_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into()))?,
        amount: row.get(4)?,
        last_scanned: DateTime::parse_from_rfc3339(&last_scanned_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn upsert_then_update_preserves_key() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        let now = Utc::now();
        upsert(&conn, Chain::Bsc, Network::Testnet, 3, TokenSymbol::Native, "1000", now).unwrap();
        upsert(&conn, Chain::Bsc, Network::Testnet, 3, TokenSymbol::Native, "2000", now).unwrap();

        let balance = get(&conn, Chain::Bsc, Network::Testnet, 3, TokenSymbol::Native)
            .unwrap()
            .unwrap();
        assert_eq!(balance.amount, "2000");
    }

    #[test]
    fn list_funded_native_excludes_zero() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        let now = Utc::now();
        upsert(&conn, Chain::Bsc, Network::Testnet, 0, TokenSymbol::Native, "0", now).unwrap();
        upsert(&conn, Chain::Bsc, Network::Testnet, 1, TokenSymbol::Native, "500", now).unwrap();

        let funded = list_funded_native(&conn, Chain::Bsc, Network::Testnet).unwrap();
        assert_eq!(funded.len(), 1);
        assert_eq!(funded[0].index, 1);
    }
}
