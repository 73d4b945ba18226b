//! Bootstrap entrypoint.
//!
//! Wires logging, settings, the store, provider pools, the two engines'
//! worth of subsystems, and the startup reconciler into a running process.
//! There is no HTTP server here — that surface, the CLI, the embedded UI,
//! and price lookups are built on top of this crate elsewhere. This binary
//! exists so the crate's subsystems can be exercised end to end: it brings
//! everything up in dependency order, reconciles in-flight transactions
//! left over from a previous run, and then blocks until asked to stop.

use std::collections::HashMap;
use std::sync::Arc;

use hdpay::config::{Network, Settings};
use hdpay::events::{ScanEventHub, TxEventHub};
use hdpay::keys::KeyService;
use hdpay::models::Chain;
use hdpay::providers::Provider;
use hdpay::store::addresses::verify_network_consistency;
use hdpay::providers::bsc_rest::BscScanProvider;
use hdpay::providers::bsc_rpc::BscRpcProvider;
use hdpay::providers::btc_esplora::EsploraProvider;
use hdpay::providers::pool::ProviderPool;
use hdpay::providers::sol_rpc::SolRpcProvider;
use hdpay::scan::ScanOrchestrator;
use hdpay::store;
use hdpay::tx::SweepLocks;
use hdpay::tx::bsc_engine::BscEngine;
use hdpay::tx::btc_engine::BtcEngine;
use hdpay::tx::reconciler::Reconciler;
use hdpay::tx::sol_engine::SolEngine;

fn btc_base_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://blockstream.info/api",
        Network::Testnet => "https://blockstream.info/testnet/api",
    }
}

fn btc_fallback_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://mempool.space/api",
        Network::Testnet => "https://mempool.space/testnet/api",
    }
}

fn bsc_rpc_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://bsc-dataseed.binance.org",
        Network::Testnet => "https://data-seed-prebsc-1-s1.binance.org:8545",
    }
}

fn sol_rpc_url(network: Network, helius_api_key: Option<&str>) -> String {
    match (network, helius_api_key) {
        (Network::Mainnet, Some(key)) => format!("https://mainnet.helius-rpc.com/?api-key={key}"),
        (Network::Mainnet, None) => "https://api.mainnet-beta.solana.com".to_string(),
        (Network::Testnet, _) => "https://api.testnet.solana.com".to_string(),
    }
}

fn btc_providers(network: Network) -> anyhow::Result<Vec<Arc<EsploraProvider>>> {
    Ok(vec![
        Arc::new(EsploraProvider::new("esplora-primary", btc_base_url(network))?),
        Arc::new(EsploraProvider::new("esplora-fallback", btc_fallback_url(network))?),
    ])
}

fn bsc_rpc_providers(network: Network) -> anyhow::Result<Vec<Arc<BscRpcProvider>>> {
    Ok(vec![Arc::new(BscRpcProvider::new("bsc-rpc-primary", bsc_rpc_url(network))?)])
}

fn bsc_rest_providers(network: Network, api_key: Option<String>) -> anyhow::Result<Vec<Arc<BscScanProvider>>> {
    Ok(vec![Arc::new(BscScanProvider::new("bscscan", network, api_key)?)])
}

fn sol_providers(network: Network, api_key: Option<&str>) -> anyhow::Result<Vec<Arc<SolRpcProvider>>> {
    Ok(vec![Arc::new(SolRpcProvider::new("sol-rpc-primary", sol_rpc_url(network, api_key))?)])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hdpay::log::init_logging();

    let settings = Settings::from_env();
    log::info!(network = settings.network.as_str(), db_path = settings.db_path.as_str(); "hdpay bootstrap starting");

    let pool = store::open_store(&settings.db_path)?;

    {
        let conn = pool.get()?;
        for chain in [Chain::Btc, Chain::Bsc, Chain::Sol] {
            verify_network_consistency(&conn, chain, settings.network)?;
        }
    }

    let key_service = Arc::new(KeyService::new(&settings.mnemonic_file, settings.network));

    let btc = btc_providers(settings.network)?;
    let bsc_rpc = bsc_rpc_providers(settings.network)?;
    let bsc_rest = bsc_rest_providers(settings.network, settings.bscscan_api_key.clone())?;
    let sol = sol_providers(settings.network, settings.helius_api_key.as_deref())?;

    let scan_event_hub = Arc::new(ScanEventHub::new());
    let tx_event_hub = Arc::new(TxEventHub::new());
    let locks = Arc::new(SweepLocks::new());

    let mut scan_pools: HashMap<Chain, Arc<ProviderPool>> = HashMap::new();
    scan_pools.insert(
        Chain::Btc,
        Arc::new(
            ProviderPool::new(Chain::Btc, btc.iter().cloned().map(|p| p as Arc<dyn Provider>).collect()).with_store(pool.clone()),
        ),
    );
    let bsc_scan_providers: Vec<Arc<dyn Provider>> = bsc_rest
        .iter()
        .cloned()
        .map(|p| p as Arc<dyn Provider>)
        .chain(bsc_rpc.iter().cloned().map(|p| p as Arc<dyn Provider>))
        .collect();
    scan_pools.insert(Chain::Bsc, Arc::new(ProviderPool::new(Chain::Bsc, bsc_scan_providers).with_store(pool.clone())));
    scan_pools.insert(
        Chain::Sol,
        Arc::new(
            ProviderPool::new(Chain::Sol, sol.iter().cloned().map(|p| p as Arc<dyn Provider>).collect()).with_store(pool.clone()),
        ),
    );

    let _btc_engine = Arc::new(BtcEngine::new(
        pool.clone(),
        settings.network,
        Arc::clone(&key_service),
        btc.clone(),
        Arc::clone(&tx_event_hub),
        Arc::clone(&locks),
    ));
    let _bsc_engine = Arc::new(BscEngine::new(
        pool.clone(),
        settings.network,
        Arc::clone(&key_service),
        bsc_rpc.clone(),
        Arc::clone(&tx_event_hub),
        Arc::clone(&locks),
    ));
    let _sol_engine = Arc::new(SolEngine::new(
        pool.clone(),
        settings.network,
        Arc::clone(&key_service),
        sol.clone(),
        Arc::clone(&tx_event_hub),
        Arc::clone(&locks),
    ));

    let reconciler = Arc::new(Reconciler::new(pool.clone(), btc, bsc_rpc, sol, Arc::clone(&tx_event_hub)));
    reconciler.reconcile().await;

    let _scan_orchestrator = Arc::new(ScanOrchestrator::new(pool, settings.network, scan_pools, scan_event_hub));

    log::info!("hdpay bootstrap complete; subsystems are live with no HTTP surface attached in this build");
    tokio::signal::ctrl_c().await?;
    log::info!("shutdown signal received, exiting");
    Ok(())
}
