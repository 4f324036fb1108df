use blake2::{Blake2s256, Digest};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The chain's native asset
pub const BTC: &str = "BTC";

/// Base units per whole unit of a divisible asset
pub const SATOSHIS_PER_UNIT: i64 = 100_000_000;

/// How an asset's base units map to display units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Divisibility {
    /// 8 decimal places, like BTC
    Divisible,
    /// Whole units only
    Indivisible,
}

impl Divisibility {
    pub fn from_flag(divisible: bool) -> Self {
        if divisible {
            Divisibility::Divisible
        } else {
            Divisibility::Indivisible
        }
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Divisibility::Divisible => 8,
            Divisibility::Indivisible => 0,
        }
    }

    /// Convert a daemon float into base units, rounding at the asset's precision.
    /// Returns None for NaN/infinite or out-of-range values.
    pub fn to_base_units(&self, quantity: f64) -> Option<i64> {
        let value = Decimal::from_f64(quantity)?;
        let scale = Decimal::from(10_i64.pow(self.decimals()));
        (value * scale).round().to_i64()
    }

    /// Decimal view of base units at the asset's precision
    pub fn to_decimal(&self, amount: i64) -> Decimal {
        Decimal::new(amount, self.decimals())
    }

    /// Formatted at the asset's precision, e.g. `0.00400000` or `12`
    pub fn format(&self, amount: i64) -> String {
        self.to_decimal(amount).to_string()
    }
}

/// Deterministic identifier of a non-transaction balance change
/// (order match, dividend, ...), used in place of a txid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash the identifying parts of an event into a 64 char hex id
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Blake2s256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(b":");
            }
            hasher.update(part.as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Wrap an identifier supplied by the upstream parser
    pub fn from_raw(raw: &str) -> Self {
        Fingerprint(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisible_floats_round_at_eight_places() {
        let d = Divisibility::Divisible;
        assert_eq!(d.to_base_units(0.004), Some(400_000));
        assert_eq!(d.to_base_units(0.1 + 0.2), Some(30_000_000));
        assert_eq!(d.format(400_000), "0.00400000");
    }

    #[test]
    fn indivisible_assets_use_whole_units() {
        let d = Divisibility::Indivisible;
        assert_eq!(d.to_base_units(12.0), Some(12));
        assert_eq!(d.format(12), "12");
        assert_eq!(d.to_base_units(f64::NAN), None);
    }

    #[test]
    fn fingerprints_are_deterministic() {
        let a = Fingerprint::derive(&["order_match", "abc", "1"]);
        let b = Fingerprint::derive(&["order_match", "abc", "1"]);
        let c = Fingerprint::derive(&["order_match", "abc1"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
