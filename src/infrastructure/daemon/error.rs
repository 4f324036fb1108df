use thiserror::Error;

/// Error type for daemon queries
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Error from the reqwest HTTP client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Error from the Bitcoin Core RPC client
    #[error("Bitcoin RPC error: {0}")]
    Rpc(#[from] bitcoincore_rpc::Error),
    /// The daemon answered with an error or an unexpected shape
    #[error("Response error: {0}")]
    Response(String),
    /// The daemon knows nothing about an asset we hold
    #[error("No asset info returned for {0}")]
    MissingAssetInfo(String),
    /// Connection refused, timed out or 5xx
    #[error("Daemon unavailable: {0}")]
    Unavailable(String),
}

impl DaemonError {
    pub fn is_transient(&self) -> bool {
        match self {
            DaemonError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DaemonError::Rpc(bitcoincore_rpc::Error::JsonRpc(_)) => true,
            DaemonError::Unavailable(_) => true,
            DaemonError::Rpc(_) | DaemonError::Response(_) | DaemonError::MissingAssetInfo(_) => {
                false
            }
        }
    }
}
