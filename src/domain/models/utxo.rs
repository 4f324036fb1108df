use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a tracked output: UNCONFIRMED -> CONFIRMED -> SENDING -> SENT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtxoType {
    Unconfirmed,
    Confirmed,
    Sending,
    Sent,
}

impl UtxoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UtxoType::Unconfirmed => "unconfirmed",
            UtxoType::Confirmed => "confirmed",
            UtxoType::Sending => "sending",
            UtxoType::Sent => "sent",
        }
    }

    /// SENDING and SENT rows belong to the spend side of the lifecycle
    pub fn is_spend_side(&self) -> bool {
        matches!(self, UtxoType::Sending | UtxoType::Sent)
    }
}

impl fmt::Display for UtxoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UtxoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unconfirmed" => Ok(UtxoType::Unconfirmed),
            "confirmed" => Ok(UtxoType::Confirmed),
            "sending" => Ok(UtxoType::Sending),
            "sent" => Ok(UtxoType::Sent),
            other => Err(format!("unknown utxo type: {}", other)),
        }
    }
}

/// `txid:n` identity of an output
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct OutputKey {
    pub txid: String,
    pub n: u32,
}

impl OutputKey {
    pub fn new(txid: &str, n: u32) -> Self {
        Self {
            txid: txid.to_string(),
            n,
        }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.n)
    }
}

impl FromStr for OutputKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, n) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("malformed output key: {}", s))?;
        let n = n
            .parse::<u32>()
            .map_err(|e| format!("malformed output index in {}: {}", s, e))?;
        Ok(OutputKey::new(txid, n))
    }
}

impl From<OutputKey> for String {
    fn from(key: OutputKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for OutputKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Snapshot of one output as seen by either side of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoSnapshot {
    pub txid: String,
    pub n: u32,
    pub amount: i64,
    pub script: String,
    pub confirmed: bool,
}

impl UtxoSnapshot {
    pub fn key(&self) -> OutputKey {
        OutputKey::new(&self.txid, self.n)
    }
}
