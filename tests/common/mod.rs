//! Shared fixtures: an in-memory database with every migration applied,
//! a scripted daemon and transaction builders.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};

use address_ledger::application::LedgerServices;
use address_ledger::config::{
    AppConfig, BitcoinConfig, DatabaseConfig, LedgerConfig, QueueConfig, TokenDaemonConfig,
};
use address_ledger::domain::models::{
    BitcoinTx, InvalidationSignal, LedgerState, ParsedBlock, ParsedTransaction, Vin, Vout, BTC,
};
use address_ledger::domain::services::InvalidationListener;
use address_ledger::infrastructure::daemon::{
    AssetInfo, DaemonClient, DaemonError, ExternalBalance, ExternalUtxo,
};
use address_ledger::infrastructure::lock::{LockService, MemoryLockService};
use address_ledger::infrastructure::persistence::{DbPool, RepositoryFactory};
use address_ledger::utils::logging;

pub const NETWORK: &str = "mainnet";
pub const ADDRESS: &str = "1LedgerTestAddressAAAAAAAAAAAAAAAA";
pub const OTHER: &str = "1LedgerTestAddressBBBBBBBBBBBBBBBB";
pub const EXTERNAL: &str = "1SomeoneElseCCCCCCCCCCCCCCCCCCCCC";
pub const SCRIPT_A: &str = "76a914aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa88ac";
pub const SCRIPT_B: &str = "76a914bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb88ac";

/// Daemon answering from scripted state
#[derive(Debug, Default)]
pub struct MockDaemon {
    pub balances: Mutex<HashMap<String, Vec<ExternalBalance>>>,
    pub utxos: Mutex<HashMap<String, Vec<ExternalUtxo>>>,
    pub assets: Mutex<HashMap<String, bool>>,
}

impl MockDaemon {
    pub fn set_balances(&self, address: &str, balances: &[(&str, f64)]) {
        let balances = balances
            .iter()
            .map(|(asset, quantity)| ExternalBalance {
                asset: asset.to_string(),
                quantity: *quantity,
            })
            .collect();
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), balances);
    }

    pub fn set_utxos(&self, address: &str, utxos: Vec<ExternalUtxo>) {
        self.utxos.lock().unwrap().insert(address.to_string(), utxos);
    }

    pub fn set_asset(&self, asset: &str, divisible: bool) {
        self.assets
            .lock()
            .unwrap()
            .insert(asset.to_string(), divisible);
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn get_balances(&self, address: &str) -> Result<Vec<ExternalBalance>, DaemonError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<ExternalUtxo>, DaemonError> {
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_asset_info(&self, assets: &[String]) -> Result<Vec<AssetInfo>, DaemonError> {
        let known = self.assets.lock().unwrap();
        Ok(assets
            .iter()
            .filter_map(|asset| {
                known.get(asset).map(|divisible| AssetInfo {
                    asset: asset.clone(),
                    divisible: *divisible,
                })
            })
            .collect())
    }
}

pub struct TestContext {
    pub services: LedgerServices,
    pub daemon: Arc<MockDaemon>,
    pub locks: Arc<MemoryLockService>,
    pub signals: tokio::sync::mpsc::UnboundedReceiver<InvalidationSignal>,
    pub pool: DbPool,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        network: NETWORK.to_string(),
        bitcoin: BitcoinConfig {
            host: "localhost".into(),
            port: "8332".into(),
            username: "bitcoin".into(),
            password: "bitcoin".into(),
        },
        token_daemon: TokenDaemonConfig {
            url: "http://localhost:4000/api/".into(),
            username: "rpc".into(),
            password: "rpc".into(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".into(),
        },
        ledger: LedgerConfig {
            address_lock_timeout: Duration::from_millis(200),
            ..LedgerConfig::default()
        },
        queue: QueueConfig {
            workers: 2,
            max_attempts: 3,
            base_backoff_ms: 5,
            max_backoff_ms: 20,
            reconcile_interval: Duration::from_secs(3600),
        },
    }
}

pub async fn setup() -> TestContext {
    logging::init_test_logger();
    let config = test_config();

    let pool = DbPool::connect(&config.database.url)
        .await
        .expect("in-memory database");
    Migrator::up(pool.get_connection(), None)
        .await
        .expect("migrations");

    let repositories = RepositoryFactory::create_repositories(&pool);
    let locks = Arc::new(MemoryLockService::new());
    let daemon = Arc::new(MockDaemon::default());
    let (sender, signals) = tokio::sync::mpsc::unbounded_channel();
    let listeners: Vec<Arc<dyn InvalidationListener>> = vec![Arc::new(sender)];

    let services = LedgerServices::new(
        &config,
        repositories,
        locks.clone() as Arc<dyn LockService>,
        daemon.clone() as Arc<dyn DaemonClient>,
        listeners,
    );

    services
        .addresses
        .register(ADDRESS, NETWORK)
        .await
        .expect("register address");

    TestContext {
        services,
        daemon,
        locks,
        signals,
        pool,
    }
}

impl TestContext {
    pub async fn balance(&self, state: LedgerState, asset: &str) -> i64 {
        self.balances_of(ADDRESS).await.get(state, asset)
    }

    /// CONFIRMED + UNCONFIRMED + SENDING: moves between states keep it fixed
    pub async fn held(&self, asset: &str) -> i64 {
        let balances = self.balances_of(ADDRESS).await;
        [
            LedgerState::Confirmed,
            LedgerState::Unconfirmed,
            LedgerState::Sending,
        ]
        .into_iter()
        .map(|state| balances.get(state, asset))
        .sum()
    }

    pub async fn balances_of(&self, address: &str) -> address_ledger::domain::models::Balances {
        self.services
            .addresses
            .balances_for_address(address, NETWORK)
            .await
            .expect("balances")
    }

    pub async fn account_balance(&self, account: &str, state: LedgerState, asset: &str) -> i64 {
        self.services
            .addresses
            .balances_for_account(ADDRESS, NETWORK, account)
            .await
            .expect("account balances")
            .get(state, asset)
    }
}

/// Builds normalized transactions the way the upstream parser delivers them
pub struct TxBuilder {
    tx: ParsedTransaction,
}

impl TxBuilder {
    pub fn new(txid: &str) -> Self {
        Self {
            tx: ParsedTransaction {
                txid: txid.to_string(),
                network: NETWORK.to_string(),
                sources: Vec::new(),
                destinations: Vec::new(),
                received_assets: BTreeMap::new(),
                spent_assets: BTreeMap::new(),
                bitcoin_tx: BitcoinTx::default(),
            },
        }
    }

    /// Spend output `prev:vout` owned by `owner`
    pub fn input(mut self, prev: &str, vout: u32, owner: &str, value_sat: i64) -> Self {
        self.tx.bitcoin_tx.vin.push(Vin {
            txid: prev.to_string(),
            vout,
            addr: Some(owner.to_string()),
            value_sat,
            script: None,
        });
        if !self.tx.sources.iter().any(|s| s == owner) {
            self.tx.sources.push(owner.to_string());
        }
        self
    }

    /// Pay `value_sat` to `address` in a new output
    pub fn output(mut self, address: &str, script: &str, value_sat: i64) -> Self {
        let n = self.tx.bitcoin_tx.vout.len() as u32;
        self.tx.bitcoin_tx.vout.push(Vout {
            n,
            value_sat,
            script: script.to_string(),
            addresses: vec![address.to_string()],
        });
        if !self.tx.destinations.iter().any(|d| d == address) {
            self.tx.destinations.push(address.to_string());
        }
        self
    }

    pub fn received(mut self, address: &str, asset: &str, quantity: i64) -> Self {
        *self
            .tx
            .received_assets
            .entry(address.to_string())
            .or_default()
            .entry(asset.to_string())
            .or_default() += quantity;
        self
    }

    pub fn spent(mut self, address: &str, asset: &str, quantity: i64) -> Self {
        *self
            .tx
            .spent_assets
            .entry(address.to_string())
            .or_default()
            .entry(asset.to_string())
            .or_default() += quantity;
        self
    }

    pub fn build(self) -> ParsedTransaction {
        self.tx
    }
}

/// External funds paid to `address` in output 0
pub fn payment(txid: &str, prev: &str, address: &str, script: &str, sat: i64) -> ParsedTransaction {
    TxBuilder::new(txid)
        .input(prev, 0, EXTERNAL, sat + 1_000)
        .output(address, script, sat)
        .received(address, BTC, sat)
        .build()
}

pub fn block(height: u64, txs: Vec<ParsedTransaction>) -> ParsedBlock {
    ParsedBlock {
        hash: format!("{:064x}", height),
        height,
        previousblockhash: None,
        tx: txs,
    }
}
