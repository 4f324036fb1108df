//! Daemon client over Bitcoin Core RPC (outputs and BTC balance) and the
//! token daemon's JSON-RPC endpoint (token balances, asset info).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitcoincore_rpc::{Auth, Client, RpcApi};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{AssetInfo, DaemonClient, DaemonError, ExternalBalance, ExternalUtxo};
use crate::config::AppConfig;
use crate::domain::models::BTC;
use crate::utils::logging;

pub struct RpcDaemonClient {
    bitcoin: Arc<Client>,
    http: reqwest::Client,
    token_url: String,
    token_username: String,
    token_password: String,
}

impl fmt::Debug for RpcDaemonClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcDaemonClient")
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ScanResult {
    #[serde(default)]
    unspents: Vec<ScanUnspent>,
    #[serde(default)]
    total_amount: f64,
}

#[derive(Debug, Deserialize)]
struct ScanUnspent {
    txid: String,
    vout: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: String,
    amount: f64,
}

impl RpcDaemonClient {
    pub fn new(config: &AppConfig) -> Result<Self, DaemonError> {
        let url = format!("http://{}:{}", config.bitcoin.host, config.bitcoin.port);
        let auth = Auth::UserPass(
            config.bitcoin.username.clone(),
            config.bitcoin.password.clone(),
        );
        let bitcoin = Client::new(&url, auth)
            .map_err(|e| DaemonError::Unavailable(format!("Failed to connect to Bitcoin RPC: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DaemonError::Response(format!("Failed to create HTTP client: {}", e)))?;

        logging::log_daemon_connection_details(
            &config.bitcoin.host,
            &config.bitcoin.port,
            &config.network,
        );

        Ok(Self {
            bitcoin: Arc::new(bitcoin),
            http,
            token_url: config.token_daemon.url.clone(),
            token_username: config.token_daemon.username.clone(),
            token_password: config.token_daemon.password.clone(),
        })
    }

    async fn call_token<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, DaemonError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.token_username, Some(&self.token_password))
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            logging::log_warning(&format!(
                "[RECONCILER] token daemon returned {} for {}",
                status, method
            ));
            return Err(DaemonError::Unavailable(format!(
                "{} returned status {}",
                method, status
            )));
        } else if !status.is_success() {
            return Err(DaemonError::Response(format!(
                "{} returned status {}",
                method, status
            )));
        }

        let envelope: RpcEnvelope<T> = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(DaemonError::Response(format!("{} failed: {}", method, error)));
        }
        envelope
            .result
            .ok_or_else(|| DaemonError::Response(format!("{} returned no result", method)))
    }

    async fn scan_address(&self, address: &str) -> Result<ScanResult, DaemonError> {
        let client = self.bitcoin.clone();
        let descriptor = format!("addr({})", address);

        tokio::task::spawn_blocking(move || {
            client.call::<ScanResult>("scantxoutset", &[json!("start"), json!([descriptor])])
        })
        .await
        .map_err(|e| DaemonError::Unavailable(e.to_string()))?
        .map_err(DaemonError::from)
    }
}

#[async_trait]
impl DaemonClient for RpcDaemonClient {
    async fn get_balances(&self, address: &str) -> Result<Vec<ExternalBalance>, DaemonError> {
        let scan = self.scan_address(address).await?;
        let tokens: Vec<ExternalBalance> = self
            .call_token("get_balances", json!({ "address": address }))
            .await?;

        let mut balances = Vec::with_capacity(tokens.len() + 1);
        if scan.total_amount > 0.0 {
            balances.push(ExternalBalance {
                asset: BTC.to_string(),
                quantity: scan.total_amount,
            });
        }
        balances.extend(
            tokens
                .into_iter()
                .filter(|b| b.asset != BTC && b.quantity != 0.0),
        );
        Ok(balances)
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<ExternalUtxo>, DaemonError> {
        let scan = self.scan_address(address).await?;

        // scantxoutset only sees the chainstate, so every output is confirmed
        Ok(scan
            .unspents
            .into_iter()
            .map(|u| ExternalUtxo {
                txid: u.txid,
                vout: u.vout,
                confirmed: true,
                script: u.script_pub_key,
                amount: u.amount,
            })
            .collect())
    }

    async fn get_asset_info(&self, assets: &[String]) -> Result<Vec<AssetInfo>, DaemonError> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }
        self.call_token("get_asset_info", json!({ "assets": assets }))
            .await
    }
}
