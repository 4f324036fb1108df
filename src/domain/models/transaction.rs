use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::utxo::OutputKey;

/// asset -> quantity in base units
pub type AssetQuantities = BTreeMap<String, i64>;

/// A transaction input as delivered by the upstream parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    /// Txid of the output being spent
    pub txid: String,
    /// Index of the output being spent
    pub vout: u32,
    /// Address that owned the spent output, when known
    #[serde(default)]
    pub addr: Option<String>,
    /// Value of the spent output in satoshis
    #[serde(default)]
    pub value_sat: i64,
    /// Script of the spent output, when known
    #[serde(default)]
    pub script: Option<String>,
}

impl Vin {
    pub fn output_key(&self) -> OutputKey {
        OutputKey::new(&self.txid, self.vout)
    }

    /// Coinbase inputs spend nothing
    pub fn is_coinbase(&self) -> bool {
        self.txid.is_empty() || self.txid.bytes().all(|b| b == b'0')
    }
}

/// A transaction output as delivered by the upstream parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    pub n: u32,
    pub value_sat: i64,
    /// scriptPubKey hex
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl Vout {
    /// OP_RETURN and zero-value outputs can never be spent
    pub fn is_spendable(&self) -> bool {
        self.value_sat > 0 && !self.script.starts_with("6a")
    }

    pub fn pays(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a == address)
    }
}

/// Bitcoin layer of a normalized transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTx {
    #[serde(default)]
    pub vin: Vec<Vin>,
    #[serde(default)]
    pub vout: Vec<Vout>,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub blockheight: Option<u64>,
}

/// Normalized transaction event produced by the upstream parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedTransaction {
    pub txid: String,
    pub network: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<String>,
    /// address -> asset -> quantity credited to that address
    #[serde(default)]
    pub received_assets: BTreeMap<String, AssetQuantities>,
    /// address -> asset -> quantity debited from that address
    #[serde(default)]
    pub spent_assets: BTreeMap<String, AssetQuantities>,
    #[serde(default)]
    pub bitcoin_tx: BitcoinTx,
}

impl ParsedTransaction {
    pub fn received_for(&self, address: &str) -> AssetQuantities {
        self.received_assets.get(address).cloned().unwrap_or_default()
    }

    pub fn spent_for(&self, address: &str) -> AssetQuantities {
        self.spent_assets.get(address).cloned().unwrap_or_default()
    }

    /// Every address that gains or loses funds in this transaction,
    /// including owners of spent inputs and paid outputs
    pub fn touched_addresses(&self) -> BTreeSet<String> {
        let inputs = self.bitcoin_tx.vin.iter().filter_map(|vin| vin.addr.as_ref());
        let outputs = self.bitcoin_tx.vout.iter().flat_map(|vout| vout.addresses.iter());

        self.received_assets
            .keys()
            .chain(self.spent_assets.keys())
            .chain(inputs)
            .chain(outputs)
            .cloned()
            .collect()
    }

    /// Keys of every previous output this transaction consumes
    pub fn spent_output_keys(&self) -> Vec<OutputKey> {
        self.bitcoin_tx
            .vin
            .iter()
            .filter(|vin| !vin.is_coinbase())
            .map(Vin::output_key)
            .collect()
    }
}

/// Normalized block event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBlock {
    pub hash: String,
    pub height: u64,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    /// Transactions of the block, already normalized
    #[serde(default)]
    pub tx: Vec<ParsedTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_upstream_event_shape() {
        let json = r#"{
            "txid": "t1",
            "network": "mainnet",
            "sources": ["1Sender"],
            "destinations": ["1Dest"],
            "receivedAssets": {"1Dest": {"BTC": 400000}},
            "spentAssets": {"1Sender": {"BTC": 410000}},
            "bitcoinTx": {
                "vin": [{"txid": "p0", "vout": 1, "addr": "1Sender", "value_sat": 410000}],
                "vout": [{"n": 0, "value_sat": 400000, "script": "76a914", "addresses": ["1Dest"]}]
            }
        }"#;
        let tx: ParsedTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.received_for("1Dest").get("BTC"), Some(&400_000));
        assert!(tx.received_for("1Sender").is_empty());
        assert_eq!(tx.spent_output_keys(), vec![OutputKey::new("p0", 1)]);
        assert_eq!(tx.touched_addresses().len(), 2);
    }

    #[test]
    fn op_return_outputs_are_not_spendable() {
        let out = Vout {
            n: 1,
            value_sat: 0,
            script: "6a146f6d6e69".into(),
            addresses: vec![],
        };
        assert!(!out.is_spendable());
    }

    #[test]
    fn coinbase_inputs_have_no_output_key() {
        let tx = ParsedTransaction {
            txid: "cb".into(),
            network: "mainnet".into(),
            sources: vec![],
            destinations: vec![],
            received_assets: BTreeMap::new(),
            spent_assets: BTreeMap::new(),
            bitcoin_tx: BitcoinTx {
                vin: vec![Vin {
                    txid: "0".repeat(64),
                    vout: u32::MAX,
                    addr: None,
                    value_sat: 0,
                    script: None,
                }],
                ..Default::default()
            },
        };
        assert!(tx.spent_output_keys().is_empty());
    }
}
