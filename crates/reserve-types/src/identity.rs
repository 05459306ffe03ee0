//! Identity types for the reserve core
//!
//! Venue and token identifiers are strongly typed wrappers around strings so a
//! venue id can never be passed where a token symbol is expected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, TypesError};

/// Macro to generate string-backed name types with common implementations
macro_rules! define_name_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create from anything string-like
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the inner string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_name_type!(VenueId, "Identifier of a centralized trading venue, or of the chain destination");
define_name_type!(TokenSymbol, "Token symbol, e.g. `ETH` or `KNC`");
define_name_type!(Address, "0x-prefixed account address of a signing identity or contract");

/// Destination name used by records whose only leg is on chain (`set_rates`)
pub const BLOCKCHAIN_DESTINATION: &str = "blockchain";

impl VenueId {
    /// The pseudo-venue for chain-only activities
    pub fn blockchain() -> Self {
        Self(BLOCKCHAIN_DESTINATION.to_string())
    }
}

// ============================================================================
// Timepoint
// ============================================================================

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
pub struct Timepoint(pub u64);

impl Timepoint {
    /// Current wall-clock time
    pub fn now() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self(u64::try_from(millis).unwrap_or(0))
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is in the future
    pub fn since(&self, earlier: Timepoint) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    pub fn plus(&self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }
}

impl fmt::Display for Timepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ActivityId
// ============================================================================

/// Composite activity identifier: submission timepoint plus an opaque id.
///
/// The wire form is `"<timepoint>|<eid>"`. The opaque id may itself contain
/// `|` (a deposit embeds `uuid|token|amount`), so parsing splits only at the
/// first separator and keeps the rest verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActivityId {
    pub timepoint: Timepoint,
    pub eid: String,
}

impl ActivityId {
    pub fn new(timepoint: Timepoint, eid: impl Into<String>) -> Self {
        Self {
            timepoint,
            eid: eid.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (tp, eid) = s.split_once('|').ok_or_else(|| TypesError::InvalidActivityId {
            raw: s.to_string(),
            reason: "missing '|' separator".to_string(),
        })?;
        let millis = tp.parse::<u64>().map_err(|e| TypesError::InvalidActivityId {
            raw: s.to_string(),
            reason: format!("bad timepoint: {}", e),
        })?;
        Ok(Self::new(Timepoint(millis), eid))
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.timepoint, self.eid)
    }
}

impl FromStr for ActivityId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ActivityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActivityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TxHash
// ============================================================================

/// A 0x-prefixed, 32-byte transaction hash, stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| TypesError::InvalidTxHash {
                raw: s.to_string(),
                reason: "missing 0x prefix".to_string(),
            })?;
        let bytes = hex::decode(body).map_err(|e| TypesError::InvalidTxHash {
            raw: s.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.len() != 32 {
            return Err(TypesError::InvalidTxHash {
                raw: s.to_string(),
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            });
        }
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    /// The all-zero hash is written by the submit path when no tx was sent
    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_id_round_trips_through_wire_form() {
        let id = ActivityId::new(Timepoint(1_700_000_000_000), "order-42");
        assert_eq!(id.to_string(), "1700000000000|order-42");
        assert_eq!(ActivityId::parse("1700000000000|order-42").unwrap(), id);
    }

    #[test]
    fn activity_id_keeps_pipes_in_opaque_part() {
        let id = ActivityId::parse("1700000000000|7f3c|KNC|12.5").unwrap();
        assert_eq!(id.timepoint, Timepoint(1_700_000_000_000));
        assert_eq!(id.eid, "7f3c|KNC|12.5");
    }

    #[test]
    fn activity_id_rejects_garbage() {
        assert!(ActivityId::parse("no-separator").is_err());
        assert!(ActivityId::parse("abc|eid").is_err());
    }

    #[test]
    fn activity_ids_sort_by_time() {
        let a = ActivityId::new(Timepoint(1), "z");
        let b = ActivityId::new(Timepoint(2), "a");
        assert!(a < b);
    }

    #[test]
    fn activity_id_serializes_as_string() {
        let id = ActivityId::new(Timepoint(5), "x|y");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"5|x|y\"");
        let back: ActivityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn tx_hash_validation() {
        let good = format!("0x{}", "Ab".repeat(32));
        let hash = TxHash::parse(&good).unwrap();
        assert_eq!(hash.as_str(), format!("0x{}", "ab".repeat(32)));
        assert!(!hash.is_zero());

        let zero = TxHash::parse(&format!("0x{}", "0".repeat(64))).unwrap();
        assert!(zero.is_zero());

        assert!(TxHash::parse("0x1234").is_err());
        assert!(TxHash::parse(&"ab".repeat(32)).is_err());
        assert!(TxHash::parse(&format!("0x{}", "zz".repeat(32))).is_err());
    }

    #[test]
    fn timepoint_since_saturates() {
        assert_eq!(Timepoint(10).since(Timepoint(4)), Duration::from_millis(6));
        assert_eq!(Timepoint(4).since(Timepoint(10)), Duration::ZERO);
    }
}
