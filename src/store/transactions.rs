use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::models::{Chain, TokenSymbol};

use super::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub id: String,
    pub chain: Chain,
    pub address_index: i64,
    pub tx_hash: Option<String>,
    pub direction: Direction,
    pub token: TokenSymbol,
    pub amount: String,
    pub from_address: String,
    pub to_address: String,
    pub block_number: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Records one contributor row for a sweep. A single BTC consolidation
/// broadcast produces one row per contributing address index, sharing
/// `tx_hash`.
#[allow(clippy::too_many_arguments)]
pub fn insert_outbound(
    conn: &Connection,
    id: &str,
    chain: Chain,
    network: &str,
    address_index: i64,
    token: TokenSymbol,
    amount: &str,
    from_address: &str,
    to_address: &str,
) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO transactions (id, chain, network, address_index, tx_hash, direction, token, amount, \
           from_address, to_address, block_number, status, created_at, confirmed_at) \
         VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?7, ?8, ?9, NULL, 'pending', ?10, NULL)",
        params![
            id,
            chain.to_string(),
            network,
            address_index,
            Direction::Outbound.to_string(),
            token.to_string(),
            amount,
            from_address,
            to_address,
            now
        ],
    )?;
    Ok(())
}

/// Mirrors a TxState terminal transition onto every `Transaction` row
/// sharing `(chain, tx_hash)`.
pub fn mark_by_tx_hash(conn: &Connection, chain: Chain, tx_hash: &str, status: &str) -> StoreResult<usize> {
    let now = Utc::now().to_rfc3339();
    let confirmed_at = if status == "confirmed" { Some(now.clone()) } else { None };
    let n = conn.execute(
        "UPDATE transactions SET status = ?1, confirmed_at = COALESCE(?2, confirmed_at) \
         WHERE chain = ?3 AND tx_hash = ?4",
        params![status, confirmed_at, chain.to_string(), tx_hash],
    )?;
    Ok(n)
}

pub fn set_tx_hash(conn: &Connection, id: &str, tx_hash: &str) -> StoreResult<()> {
    conn.execute("UPDATE transactions SET tx_hash = ?1 WHERE id = ?2", params![tx_hash, id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn terminal_transition_updates_every_contributor() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        for i in 0..3 {
            insert_outbound(
                &conn,
                &format!("tx{}", i),
                Chain::Btc,
                "testnet",
                i,
                TokenSymbol::Native,
                "1000",
                "from",
                "dest",
            )
            .unwrap();
            set_tx_hash(&conn, &format!("tx{}", i), "sharedhash").unwrap();
        }

        let updated = mark_by_tx_hash(&conn, Chain::Btc, "sharedhash", "confirmed").unwrap();
        assert_eq!(updated, 3);
    }
}
