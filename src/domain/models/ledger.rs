use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Trust state of a ledger balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerState {
    Confirmed,
    Unconfirmed,
    Sending,
}

impl LedgerState {
    pub const ALL: [LedgerState; 3] = [
        LedgerState::Confirmed,
        LedgerState::Unconfirmed,
        LedgerState::Sending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerState::Confirmed => "confirmed",
            LedgerState::Unconfirmed => "unconfirmed",
            LedgerState::Sending => "sending",
        }
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(LedgerState::Confirmed),
            "unconfirmed" => Ok(LedgerState::Unconfirmed),
            "sending" => Ok(LedgerState::Sending),
            other => Err(format!("unknown ledger state: {}", other)),
        }
    }
}

/// Direction of a ledger entry. Only disambiguates entries sharing a txid
/// (a send and its change receive); balance math ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Receive,
    Send,
    Other,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Receive => "receive",
            Direction::Send => "send",
            Direction::Other => "other",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(Direction::Receive),
            "send" => Ok(Direction::Send),
            "other" => Ok(Direction::Other),
            other => Err(format!("unknown ledger direction: {}", other)),
        }
    }
}

/// asset -> amount in base units
pub type AssetBalances = BTreeMap<String, i64>;

/// Balances grouped by state, then by asset.
/// Zero balances are not stored, so an absent asset reads as 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balances {
    by_state: BTreeMap<LedgerState, AssetBalances>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the running balance; drops the key when it nets to zero
    pub fn add(&mut self, state: LedgerState, asset: &str, amount: i64) {
        let assets = self.by_state.entry(state).or_default();
        let total = assets.get(asset).copied().unwrap_or(0) + amount;
        if total == 0 {
            assets.remove(asset);
        } else {
            assets.insert(asset.to_string(), total);
        }
        if assets.is_empty() {
            self.by_state.remove(&state);
        }
    }

    pub fn get(&self, state: LedgerState, asset: &str) -> i64 {
        self.by_state
            .get(&state)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or(0)
    }

    pub fn state(&self, state: LedgerState) -> AssetBalances {
        self.by_state.get(&state).cloned().unwrap_or_default()
    }

    /// Sum across all three states
    pub fn total(&self, asset: &str) -> i64 {
        LedgerState::ALL.iter().map(|s| self.get(*s, asset)).sum()
    }

    pub fn assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = self
            .by_state
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect();
        assets.sort();
        assets.dedup();
        assets
    }

    pub fn is_empty(&self) -> bool {
        self.by_state.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LedgerState, &str, i64)> {
        self.by_state.iter().flat_map(|(state, assets)| {
            assets
                .iter()
                .map(move |(asset, amount)| (*state, asset.as_str(), *amount))
        })
    }

    /// First (state, asset) whose balance is negative, if any
    pub fn first_negative(&self) -> Option<(LedgerState, String, i64)> {
        self.iter()
            .find(|(_, _, amount)| *amount < 0)
            .map(|(state, asset, amount)| (state, asset.to_string(), amount))
    }
}

/// Net amount for one (state, asset, direction) slice of a txid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedBalance {
    pub account_id: i32,
    pub state: LedgerState,
    pub direction: Direction,
    pub asset: String,
    pub txid: Option<String>,
    pub amount: i64,
}
