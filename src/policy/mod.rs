//! Desired storage placement rules
//!
//! Translates the fault-tolerance option chosen by the operator into the
//! ordered, typed rule set every storage policy must carry.

pub mod desired;
pub mod rules;

pub use desired::{DesiredRuleSet, FaultTolerance};
pub use rules::{Capability, Locality, ReplicationMode, RuleValue};
