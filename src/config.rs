//! Minimal environment-driven settings. No file layering, no hot reload —
//! the process reads its configuration exactly once at startup.

use std::env;

/// Target network for every chain. Only two values are recognized; each
/// chain maps this onto its own coin-type / chain-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    fn from_env(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "mainnet" => Network::Mainnet,
            _ => Network::Testnet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub network: Network,
    pub port: u16,
    pub db_path: String,
    pub mnemonic_file: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub bscscan_api_key: Option<String>,
    pub helius_api_key: Option<String>,
}

impl Settings {
    /// Reads every recognized environment variable, applying defaults for
    /// anything absent. Never fails: unparseable numeric values fall back
    /// to their default rather than aborting startup.
    pub fn from_env() -> Self {
        Settings {
            network: env::var("NETWORK")
                .map(|v| Network::from_env(&v))
                .unwrap_or(Network::Testnet),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "hdpay.db".to_string()),
            mnemonic_file: env::var("MNEMONIC_FILE").unwrap_or_else(|_| "mnemonic.txt".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: env::var("LOG_DIR").ok(),
            bscscan_api_key: env::var("BSCSCAN_API_KEY").ok(),
            helius_api_key: env::var("HELIUS_API_KEY").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // SAFETY: test runs serially enough within this module; no other
        // test in this crate reads these specific variable names.
        unsafe {
            env::remove_var("NETWORK");
            env::remove_var("PORT");
            env::remove_var("DB_PATH");
        }
        let settings = Settings::from_env();
        assert_eq!(settings.network, Network::Testnet);
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.db_path, "hdpay.db");
    }

    #[test]
    fn mainnet_is_case_insensitive() {
        assert_eq!(Network::from_env("MAINNET"), Network::Mainnet);
        assert_eq!(Network::from_env("mainnet"), Network::Mainnet);
        assert_eq!(Network::from_env("garbage"), Network::Testnet);
    }
}
