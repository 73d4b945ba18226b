//! Persistent store: a pooled SQLite connection plus versioned migrations
//! and module-per-table accessors.

pub mod addresses;
pub mod balances;
pub mod error;
pub mod provider_health;
pub mod scan_state;
pub mod settings;
pub mod transactions;
pub mod tx_state;

pub use addresses::Address;
pub use balances::Balance;
pub use error::{StoreError, StoreResult};
pub use provider_health::ProviderHealthRow;
pub use scan_state::ScanStateRow;
pub use transactions::TransactionRow;
pub use tx_state::TxStateRow;

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite_migration::{M, Migrations};

pub type SqlitePool = Pool<SqliteConnectionManager>;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE addresses (
            chain TEXT NOT NULL,
            network TEXT NOT NULL,
            address_index INTEGER NOT NULL,
            address TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (chain, network, address_index)
        );
        CREATE UNIQUE INDEX idx_addresses_string ON addresses (chain, network, address);

        CREATE TABLE balances (
            chain TEXT NOT NULL,
            network TEXT NOT NULL,
            address_index INTEGER NOT NULL,
            token TEXT NOT NULL,
            amount TEXT NOT NULL,
            last_scanned TEXT NOT NULL,
            PRIMARY KEY (chain, network, address_index, token)
        );

        CREATE TABLE scan_state (
            chain TEXT NOT NULL,
            network TEXT NOT NULL,
            last_scanned_index INTEGER NOT NULL,
            max_scan_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (chain, network)
        );

        CREATE TABLE transactions (
            id TEXT PRIMARY KEY,
            chain TEXT NOT NULL,
            network TEXT NOT NULL,
            address_index INTEGER NOT NULL,
            tx_hash TEXT,
            direction TEXT NOT NULL,
            token TEXT NOT NULL,
            amount TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            block_number INTEGER,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            confirmed_at TEXT
        );
        CREATE INDEX idx_transactions_chain_hash ON transactions (chain, tx_hash);

        CREATE TABLE tx_state (
            id TEXT PRIMARY KEY,
            sweep_id TEXT NOT NULL,
            chain TEXT NOT NULL,
            token TEXT NOT NULL,
            address_index INTEGER NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            amount TEXT NOT NULL,
            tx_hash TEXT,
            nonce INTEGER,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            error TEXT
        );
        CREATE INDEX idx_tx_state_sweep ON tx_state (sweep_id);
        CREATE INDEX idx_tx_state_status ON tx_state (status);

        CREATE TABLE provider_health (
            provider_name TEXT PRIMARY KEY,
            chain TEXT NOT NULL,
            provider_type TEXT NOT NULL,
            status TEXT NOT NULL,
            consecutive_fails INTEGER NOT NULL,
            last_success TEXT,
            last_error TEXT,
            last_error_msg TEXT,
            circuit_state TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )])
}

/// Opens (creating if necessary) the SQLite file at `path`, resolving the
/// path, creating parent directories, and running every pending migration
/// before returning a pooled handle.
pub fn open_store<P: AsRef<Path>>(path: P) -> StoreResult<SqlitePool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder().max_size(5).build(manager)?;

    let mut conn = pool.get()?;
    migrations().to_latest(&mut conn)?;

    Ok(pool)
}

/// Opens an in-memory store, for tests.
pub fn open_in_memory_store() -> StoreResult<SqlitePool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager)?;
    let mut conn = pool.get()?;
    migrations().to_latest(&mut conn)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_cleanly() {
        let pool = open_in_memory_store().expect("migrations should apply");
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='addresses'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
