use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{Chain, CircuitState, ProviderStatus};

use super::error::StoreResult;

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderHealthRow {
    pub provider_name: String,
    pub chain: Chain,
    pub provider_type: String,
    pub status: ProviderStatus,
    pub consecutive_fails: i64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_msg: Option<String>,
    pub circuit_state: CircuitState,
}

/// Overwrite, not read-modify: the in-memory circuit breaker is the source
/// of truth and this row is its durable mirror.
#[allow(clippy::too_many_arguments)]
pub fn upsert(
    conn: &Connection,
    provider_name: &str,
    chain: Chain,
    provider_type: &str,
    status: ProviderStatus,
    consecutive_fails: i64,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<DateTime<Utc>>,
    last_error_msg: Option<&str>,
    circuit_state: CircuitState,
) -> StoreResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO provider_health (provider_name, chain, provider_type, status, consecutive_fails, \
           last_success, last_error, last_error_msg, circuit_state, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT (provider_name) DO UPDATE SET \
           status = excluded.status, consecutive_fails = excluded.consecutive_fails, \
           last_success = excluded.last_success, last_error = excluded.last_error, \
           last_error_msg = excluded.last_error_msg, circuit_state = excluded.circuit_state, \
           updated_at = excluded.updated_at",
        params![
            provider_name,
            chain.to_string(),
            provider_type,
            status.to_string(),
            consecutive_fails,
            last_success.map(|t| t.to_rfc3339()),
            last_error.map(|t| t.to_rfc3339()),
            last_error_msg,
            circuit_state.to_string(),
            now
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, provider_name: &str) -> StoreResult<Option<ProviderHealthRow>> {
    conn.query_row(
        "SELECT provider_name, chain, provider_type, status, consecutive_fails, last_success, last_error, \
           last_error_msg, circuit_state FROM provider_health WHERE provider_name = ?1",
        params![provider_name],
        row_to_health,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_all(conn: &Connection) -> StoreResult<Vec<ProviderHealthRow>> {
    let mut stmt = conn.prepare(
        "SELECT provider_name, chain, provider_type, status, consecutive_fails, last_success, last_error, \
           last_error_msg, circuit_state FROM provider_health ORDER BY provider_name ASC",
    )?;
    let rows = stmt.query_map([], row_to_health)?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_health(row: &rusqlite::Row) -> rusqlite::Result<ProviderHealthRow> {
    let chain_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let circuit_state_str: String = row.get(8)?;
    let last_success_str: Option<String> = row.get(5)?;
    let last_error_str: Option<String> = row.get(6)?;

    Ok(ProviderHealthRow {
        provider_name: row.get(0)?,
        chain: chain_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into()))?,
        provider_type: row.get(2)?,
        status: status_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into()))?,
        consecutive_fails: row.get(4)?,
        last_success: last_success_str
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
        last_error: last_error_str
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?,
        last_error_msg: row.get(7)?,
        circuit_state: circuit_state_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn upsert_overwrites_rather_than_merges() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        upsert(
            &conn,
            "esplora-blockstream",
            Chain::Btc,
            "esplora",
            ProviderStatus::Healthy,
            0,
            Some(Utc::now()),
            None,
            None,
            CircuitState::Closed,
        )
        .unwrap();
        upsert(
            &conn,
            "esplora-blockstream",
            Chain::Btc,
            "esplora",
            ProviderStatus::Down,
            5,
            None,
            Some(Utc::now()),
            Some("timeout"),
            CircuitState::Open,
        )
        .unwrap();

        let row = get(&conn, "esplora-blockstream").unwrap().unwrap();
        assert_eq!(row.status, ProviderStatus::Down);
        assert_eq!(row.consecutive_fails, 5);
        assert_eq!(row.circuit_state, CircuitState::Open);
    }
}
