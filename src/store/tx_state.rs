use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{Chain, TokenSymbol, TxStatus};

use super::error::StoreResult;

#[derive(Debug, Clone, PartialEq)]
pub struct TxStateRow {
    pub id: String,
    pub sweep_id: String,
    pub chain: Chain,
    pub token: TokenSymbol,
    pub address_index: i64,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub tx_hash: Option<String>,
    pub nonce: Option<i64>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[allow(clippy::too_many_arguments)]
pub fn insert(
    conn: &Connection,
    id: &str,
    sweep_id: &str,
    chain: Chain,
    token: TokenSymbol,
    address_index: i64,
    from_address: &str,
    to_address: &str,
    amount: &str,
    status: TxStatus,
) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO tx_state (id, sweep_id, chain, token, address_index, from_address, to_address, amount, \
           tx_hash, nonce, status, created_at, updated_at, error) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, ?10, ?10, NULL)",
        params![
            id,
            sweep_id,
            chain.to_string(),
            token.to_string(),
            address_index,
            from_address,
            to_address,
            amount,
            status.to_string(),
            now
        ],
    )?;
    Ok(())
}

/// Moves a row into `status`, never overwriting a terminal state. Callers
/// that need to force a terminal state (e.g. the reconciler marking a row
/// `failed`) should check `is_terminal()` themselves first — this function
/// enforces monotonicity by refusing the update once the persisted row is
/// terminal.
pub fn transition(
    conn: &Connection,
    id: &str,
    status: TxStatus,
    tx_hash: Option<&str>,
    error: Option<&str>,
) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE tx_state SET status = ?1, tx_hash = COALESCE(?2, tx_hash), error = ?3, updated_at = ?4 \
         WHERE id = ?5 AND status NOT IN ('confirmed', 'failed', 'dismissed')",
        params![status.to_string(), tx_hash, error, now, id],
    )?;
    Ok(())
}

pub fn set_nonce(conn: &Connection, id: &str, nonce: i64) -> StoreResult<()> {
    conn.execute("UPDATE tx_state SET nonce = ?1 WHERE id = ?2", params![nonce, id])?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> StoreResult<Option<TxStateRow>> {
    conn.query_row(
        "SELECT id, sweep_id, chain, token, address_index, from_address, to_address, amount, tx_hash, nonce, \
           status, created_at, updated_at, error \
         FROM tx_state WHERE id = ?1",
        params![id],
        row_to_tx_state,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_by_sweep(conn: &Connection, sweep_id: &str) -> StoreResult<Vec<TxStateRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sweep_id, chain, token, address_index, from_address, to_address, amount, tx_hash, nonce, \
           status, created_at, updated_at, error \
         FROM tx_state WHERE sweep_id = ?1 ORDER BY address_index ASC",
    )?;
    let rows = stmt.query_map(params![sweep_id], row_to_tx_state)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every row not yet in a terminal state, used by the startup reconciler.
pub fn list_non_terminal(conn: &Connection) -> StoreResult<Vec<TxStateRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sweep_id, chain, token, address_index, from_address, to_address, amount, tx_hash, nonce, \
           status, created_at, updated_at, error \
         FROM tx_state WHERE status NOT IN ('confirmed', 'failed', 'dismissed')",
    )?;
    let rows = stmt.query_map([], row_to_tx_state)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Idempotency check for gas pre-seed: has this `(sweep_id, to_address)`
/// pair already been confirmed?
pub fn gas_preseed_already_confirmed(conn: &Connection, sweep_id: &str, to_address: &str) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM tx_state WHERE sweep_id = ?1 AND to_address = ?2 AND status = 'confirmed'",
        params![sweep_id, to_address],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_tx_state(row: &rusqlite::Row) -> rusqlite::Result<TxStateRow> {
    let chain_str: String = row.get(2)?;
    let token_str: String = row.get(3)?;
    let status_str: String = row.get(10)?;
    let created_at_str: String = row.get(11)?;
    let updated_at_str: String = row.get(12)?;

    Ok(TxStateRow {
        id: row.get(0)?,
        sweep_id: row.get(1)?,
        chain: chain_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into()))?,
        token: token_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into()))?,
        address_index: row.get(4)?,
        from_address: row.get(5)?,
        to_address: row.get(6)?,
        amount: row.get(7)?,
        tx_hash: row.get(8)?,
        nonce: row.get(9)?,
        status: status_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, e.into()))?,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Text, Box::new(e)))?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e)))?,
        error: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn terminal_state_cannot_be_overwritten() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        insert(
            &conn,
            "tx1",
            "sweep1",
            Chain::Btc,
            TokenSymbol::Native,
            0,
            "from",
            "to",
            "1000",
            TxStatus::Confirming,
        )
        .unwrap();
        transition(&conn, "tx1", TxStatus::Confirmed, Some("abcd"), None).unwrap();
        transition(&conn, "tx1", TxStatus::Failed, None, Some("late error")).unwrap();

        let row = get(&conn, "tx1").unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Confirmed);
        assert_eq!(row.tx_hash.as_deref(), Some("abcd"));
    }

    #[test]
    fn list_by_sweep_orders_by_index() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        for i in [2, 0, 1] {
            insert(
                &conn,
                &format!("tx{}", i),
                "sweep1",
                Chain::Btc,
                TokenSymbol::Native,
                i,
                "from",
                "to",
                "1000",
                TxStatus::Pending,
            )
            .unwrap();
        }
        let rows = list_by_sweep(&conn, "sweep1").unwrap();
        assert_eq!(rows.iter().map(|r| r.address_index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn gas_preseed_idempotency_check() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        insert(
            &conn,
            "tx1",
            "sweep1",
            Chain::Bsc,
            TokenSymbol::Native,
            0,
            "holder",
            "addr1",
            "5000000000000000",
            TxStatus::Confirming,
        )
        .unwrap();
        assert!(!gas_preseed_already_confirmed(&conn, "sweep1", "addr1").unwrap());
        transition(&conn, "tx1", TxStatus::Confirmed, Some("hash"), None).unwrap();
        assert!(gas_preseed_already_confirmed(&conn, "sweep1", "addr1").unwrap());
    }
}
