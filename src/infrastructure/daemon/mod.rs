//! Authoritative chain state, queried by the reconcilers.

pub mod error;
pub mod rpc;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::DaemonError;
pub use rpc::RpcDaemonClient;

/// One asset balance as the daemon reports it (display units)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalBalance {
    pub asset: String,
    pub quantity: f64,
}

/// One unspent output as the daemon reports it (amount in BTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalUtxo {
    pub txid: String,
    pub vout: u32,
    pub confirmed: bool,
    pub script: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub asset: String,
    pub divisible: bool,
}

/// Daemon queries used by reconciliation
#[async_trait]
pub trait DaemonClient: Send + Sync + fmt::Debug {
    /// Every non-zero asset balance held by `address`, BTC included
    async fn get_balances(&self, address: &str) -> Result<Vec<ExternalBalance>, DaemonError>;

    /// Unspent BTC outputs paying `address`
    async fn get_utxos(&self, address: &str) -> Result<Vec<ExternalUtxo>, DaemonError>;

    /// Divisibility of token assets. Unknown assets are simply absent.
    async fn get_asset_info(&self, assets: &[String]) -> Result<Vec<AssetInfo>, DaemonError>;
}
