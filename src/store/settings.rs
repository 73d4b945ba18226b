use rusqlite::{Connection, OptionalExtension, params};

use super::error::StoreResult;

/// Persisted runtime settings (`GET/PUT /api/settings`), distinct from the
/// process-startup `Settings` struct in `crate::config`.
pub fn get(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(Into::into)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

pub fn list_all(conn: &Connection) -> StoreResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key ASC")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Clears every balance/address/scan-state row for a chain, used by
/// `POST /api/settings/reset-balances`. Addresses themselves are deleted
/// too since the data model says the address-generation step owns address
/// rows and they are "deleted only by an explicit reset".
pub fn reset_balances(conn: &Connection, chain: &str, network: &str) -> StoreResult<()> {
    conn.execute("DELETE FROM balances WHERE chain = ?1 AND network = ?2", params![chain, network])?;
    conn.execute("DELETE FROM scan_state WHERE chain = ?1 AND network = ?2", params![chain, network])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_in_memory_store;

    #[test]
    fn set_then_get_roundtrip() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        set(&conn, "resume_threshold_hours", "24").unwrap();
        assert_eq!(get(&conn, "resume_threshold_hours").unwrap().as_deref(), Some("24"));
    }

    #[test]
    fn set_overwrites_value() {
        let pool = open_in_memory_store().unwrap();
        let conn = pool.get().unwrap();
        set(&conn, "k", "v1").unwrap();
        set(&conn, "k", "v2").unwrap();
        assert_eq!(get(&conn, "k").unwrap().as_deref(), Some("v2"));
    }
}
