//! HDPay: a self-hosted custody console for an HD wallet spanning Bitcoin,
//! BNB Smart Chain, and Solana.
//!
//! This crate implements the two subsystems that concentrate HDPay's
//! engineering — the scan engine and the sweep/send engine — plus the
//! ambient runtime stack (store, error taxonomy, logging, configuration)
//! needed to run them end to end. The JSON HTTP surface, CLI argument
//! parsing, the embedded web UI, and CoinGecko price fetching are external
//! collaborators and live outside this crate.
//!
//! # Architecture
//!
//! - [`config`]: environment-driven `Settings`, read once at startup.
//! - [`store`]: pooled SQLite connections, versioned migrations, and
//!   module-per-table accessors for addresses, balances, scan state, tx
//!   state, transaction history, provider health, and settings.
//! - [`models`]: shared enums (`Chain`, `TokenSymbol`, `ScanStatus`,
//!   `TxStatus`, `CircuitState`, `ProviderStatus`).
//! - [`rate_limiter`]: per-provider-endpoint token-bucket pacing.
//! - [`circuit_breaker`]: three-state failure isolation per provider.
//! - [`providers`]: the `Provider` contract, four concrete chain providers,
//!   and the round-robin/failover pool built on top of them.
//! - [`events`]: bounded multi-subscriber event hubs (`scan_*`, `tx_*`).
//! - [`addresses`]: on-demand derivation of the dense receive-address set.
//! - [`scan`]: the per-chain scan orchestrator — checkpoints, resume,
//!   backoff, and progress events.
//! - [`keys`]: on-demand HD key derivation from the mnemonic file.
//! - [`tx`]: the BTC/BSC/SOL sweep engines and the startup reconciler.
//! - [`log`]: structured logging setup and PII-masking helpers.

pub mod addresses;
pub mod circuit_breaker;
pub mod config;
pub mod events;
pub mod keys;
pub mod log;
pub mod models;
pub mod providers;
pub mod rate_limiter;
pub mod scan;
pub mod store;
pub mod tx;
