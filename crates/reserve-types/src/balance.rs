//! Balance entries and the per-cycle authoritative snapshot

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::{ActivityRecord, Timepoint, TokenSymbol, VenueId};

/// On-chain balance of one token held by the reserve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub valid: bool,
    #[serde(default)]
    pub error: String,
    pub timestamp: Timepoint,
    pub return_time: Timepoint,
    pub balance: Decimal,
}

impl BalanceEntry {
    pub fn ok(balance: Decimal, timestamp: Timepoint, return_time: Timepoint) -> Self {
        Self {
            valid: true,
            error: String::new(),
            timestamp,
            return_time,
            balance,
        }
    }

    pub fn failed(error: impl Into<String>, timestamp: Timepoint, return_time: Timepoint) -> Self {
        Self {
            valid: false,
            error: error.into(),
            timestamp,
            return_time,
            balance: Decimal::ZERO,
        }
    }

    /// Keep `previous`'s balance but mark it invalid with this cycle's error
    pub fn carried_from(previous: &BalanceEntry, failed: &BalanceEntry) -> Self {
        Self {
            valid: false,
            error: failed.error.clone(),
            timestamp: failed.timestamp,
            return_time: failed.return_time,
            balance: previous.balance,
        }
    }
}

/// Balances held on one venue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EBalanceEntry {
    /// The fetch succeeded this cycle
    pub valid: bool,
    /// The venue is reachable and trading
    pub status: bool,
    #[serde(default)]
    pub error: String,
    pub timestamp: Timepoint,
    pub return_time: Timepoint,
    #[serde(default)]
    pub available: HashMap<TokenSymbol, Decimal>,
    #[serde(default)]
    pub locked: HashMap<TokenSymbol, Decimal>,
    #[serde(default)]
    pub deposit: HashMap<TokenSymbol, Decimal>,
}

impl EBalanceEntry {
    pub fn failed(error: impl Into<String>, timestamp: Timepoint, return_time: Timepoint) -> Self {
        Self {
            valid: false,
            status: false,
            error: error.into(),
            timestamp,
            return_time,
            ..Default::default()
        }
    }

    /// Last cycle's balances, flagged with this cycle's failure
    pub fn carried_from(previous: &EBalanceEntry, failed: &EBalanceEntry) -> Self {
        Self {
            valid: false,
            status: false,
            error: failed.error.clone(),
            timestamp: failed.timestamp,
            return_time: failed.return_time,
            available: previous.available.clone(),
            locked: previous.locked.clone(),
            deposit: previous.deposit.clone(),
        }
    }
}

/// One cycle's merged view of every balance and every still-pending activity.
///
/// `valid` is false iff any constituent fetch failed; `error` carries the
/// reason. Nested entries keep their own errors, so "one token failed" stays
/// distinguishable from "everything failed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthDataSnapshot {
    pub valid: bool,
    #[serde(default)]
    pub error: String,
    pub timestamp: Timepoint,
    pub return_time: Timepoint,
    pub exchange_balances: BTreeMap<VenueId, EBalanceEntry>,
    pub reserve_balances: BTreeMap<TokenSymbol, BalanceEntry>,
    pub pending_activities: Vec<ActivityRecord>,
    pub block: u64,
}

impl AuthDataSnapshot {
    pub fn new(timestamp: Timepoint) -> Self {
        Self {
            valid: true,
            error: String::new(),
            timestamp,
            return_time: timestamp,
            exchange_balances: BTreeMap::new(),
            reserve_balances: BTreeMap::new(),
            pending_activities: Vec::new(),
            block: 0,
        }
    }

    /// Mark the snapshot invalid. The latest reason wins.
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        self.valid = false;
        self.error = reason.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn carried_venue_balance_keeps_values_and_takes_new_error() {
        let mut previous = EBalanceEntry {
            valid: true,
            status: true,
            timestamp: Timepoint(1),
            return_time: Timepoint(2),
            ..Default::default()
        };
        previous.available.insert("KNC".into(), dec!(1500));
        previous.locked.insert("KNC".into(), dec!(20));

        let failed = EBalanceEntry::failed("timeout", Timepoint(10), Timepoint(11));
        let carried = EBalanceEntry::carried_from(&previous, &failed);

        assert!(!carried.valid);
        assert!(!carried.status);
        assert_eq!(carried.error, "timeout");
        assert_eq!(carried.timestamp, Timepoint(10));
        assert_eq!(carried.available[&TokenSymbol::from("KNC")], dec!(1500));
        assert_eq!(carried.locked[&TokenSymbol::from("KNC")], dec!(20));
    }

    #[test]
    fn carried_chain_balance_keeps_amount() {
        let previous = BalanceEntry::ok(dec!(3.5), Timepoint(1), Timepoint(1));
        let failed = BalanceEntry::failed("rpc down", Timepoint(5), Timepoint(6));
        let carried = BalanceEntry::carried_from(&previous, &failed);
        assert!(!carried.valid);
        assert_eq!(carried.balance, dec!(3.5));
        assert_eq!(carried.error, "rpc down");
    }

    #[test]
    fn snapshot_serializes_with_venue_keys() {
        let mut snapshot = AuthDataSnapshot::new(Timepoint(42));
        snapshot
            .exchange_balances
            .insert("binance".into(), EBalanceEntry::failed("x", Timepoint(42), Timepoint(43)));
        snapshot.invalidate("x");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["exchange_balances"]["binance"]["error"], "x");

        let back: AuthDataSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }
}
