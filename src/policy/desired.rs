//! Desired rule set construction

use super::rules::{Capability, Locality, ReplicationMode, RuleValue};
use crate::error::{Result, StretchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest sub-failure count mirroring supports
pub const MAX_SUB_FAILURES: u8 = 3;

/// Fault-tolerance scheme for storage objects inside one fault domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FaultTolerance {
    /// Mirroring, one sub-failure tolerated
    #[default]
    Default,
    /// Mirroring with an explicit sub-failure count
    Mirror { failures: u8 },
    /// Erasure coding, single parity
    Raid5,
    /// Erasure coding, double parity
    Raid6,
}

impl FaultTolerance {
    /// Replication mode and tolerated sub-failures for this scheme
    pub fn resolve(&self) -> Result<(ReplicationMode, u8)> {
        match *self {
            FaultTolerance::Default => Ok((ReplicationMode::Mirroring, 1)),
            FaultTolerance::Mirror { failures } if failures <= MAX_SUB_FAILURES => {
                Ok((ReplicationMode::Mirroring, failures))
            }
            FaultTolerance::Mirror { failures } => Err(StretchError::InvalidConfig(format!(
                "sub-failures to tolerate must be between 0 and {}, got {}",
                MAX_SUB_FAILURES, failures
            ))),
            FaultTolerance::Raid5 => Ok((ReplicationMode::ErasureCoding, 1)),
            FaultTolerance::Raid6 => Ok((ReplicationMode::ErasureCoding, 2)),
        }
    }
}

/// Ordered capability -> value mapping a storage policy must match.
///
/// The set built from the options is a template without a locality. Each
/// fault domain gets its own copy via [`DesiredRuleSet::for_domain`]; the
/// template itself is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRuleSet {
    rules: BTreeMap<Capability, RuleValue>,
}

impl DesiredRuleSet {
    /// Build the template from a fault-tolerance scheme
    pub fn build(tolerance: FaultTolerance) -> Result<Self> {
        let (mode, failures) = tolerance.resolve()?;

        let mut rules = BTreeMap::new();
        rules.insert(Capability::ReplicationMode, RuleValue::Replication(mode));
        rules.insert(Capability::SubFailuresTolerated, RuleValue::Failures(failures));

        Ok(Self { rules })
    }

    /// Independent copy of this set with the locality filled in
    pub fn for_domain(&self, locality: Locality) -> DesiredRuleSet {
        let mut copy = self.clone();
        copy.rules
            .insert(Capability::Locality, RuleValue::Locality(locality));
        copy
    }

    pub fn get(&self, capability: Capability) -> Option<&RuleValue> {
        self.rules.get(&capability)
    }

    pub fn locality(&self) -> Option<Locality> {
        match self.rules.get(&Capability::Locality) {
            Some(RuleValue::Locality(locality)) => Some(*locality),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, RuleValue)> + '_ {
        self.rules.iter().map(|(cap, value)| (*cap, *value))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules keyed and valued the way the platform stores them
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(cap, value)| (cap.key().to_string(), value.to_wire()))
            .collect()
    }
}
