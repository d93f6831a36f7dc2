//! Storage capabilities and their typed values

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage capability a policy rule constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Mirroring or erasure coding
    #[serde(rename = "VSAN.replicaPreference")]
    ReplicationMode,
    /// Failures tolerated inside a single fault domain
    #[serde(rename = "VSAN.subFailuresToTolerate")]
    SubFailuresTolerated,
    /// Preferred or secondary fault domain
    #[serde(rename = "VSAN.locality")]
    Locality,
}

impl Capability {
    /// All capabilities, in rule order
    pub const ALL: [Capability; 3] = [
        Capability::ReplicationMode,
        Capability::SubFailuresTolerated,
        Capability::Locality,
    ];

    /// Key the platform uses for this capability
    pub fn key(&self) -> &'static str {
        match self {
            Capability::ReplicationMode => "VSAN.replicaPreference",
            Capability::SubFailuresTolerated => "VSAN.subFailuresToTolerate",
            Capability::Locality => "VSAN.locality",
        }
    }

    /// Parse a platform capability key
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Data replication scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicationMode {
    Mirroring,
    ErasureCoding,
}

impl ReplicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMode::Mirroring => "RAID-1 (Mirroring) - Performance",
            ReplicationMode::ErasureCoding => "RAID-5/6 (Erasure Coding) - Capacity",
        }
    }
}

/// Which side of a stretched cluster a policy pins data to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locality {
    Preferred,
    Secondary,
}

impl Locality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locality::Preferred => "Preferred",
            Locality::Secondary => "Secondary",
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a single rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleValue {
    Replication(ReplicationMode),
    Failures(u8),
    Locality(Locality),
}

impl RuleValue {
    /// Value as the platform stores it
    pub fn to_wire(&self) -> String {
        match self {
            RuleValue::Replication(mode) => mode.as_str().to_string(),
            RuleValue::Failures(n) => n.to_string(),
            RuleValue::Locality(locality) => locality.as_str().to_string(),
        }
    }
}

impl fmt::Display for RuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_keys_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_key(cap.key()), Some(cap));
        }
        assert_eq!(Capability::from_key("VSAN.stripeWidth"), None);
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(RuleValue::Failures(2).to_wire(), "2");
        assert_eq!(
            RuleValue::Locality(Locality::Secondary).to_wire(),
            "Secondary"
        );
        assert!(RuleValue::Replication(ReplicationMode::Mirroring)
            .to_wire()
            .contains("Mirroring"));
    }
}
