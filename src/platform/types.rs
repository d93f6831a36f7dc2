//! Resource types exchanged with the management platform

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

handle!(
    /// Platform identifier of a cluster
    ClusterId
);
handle!(
    /// Platform identifier of a host
    HostId
);
handle!(
    /// Platform identifier of a tag category
    CategoryId
);
handle!(
    /// Platform identifier of a tag
    TagId
);
handle!(
    /// Platform identifier of a compute policy
    PolicyId
);
handle!(
    /// Platform identifier of a storage policy
    StoragePolicyId
);

/// Compute cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(rename = "cluster")]
    pub id: ClusterId,
    pub name: String,
}

/// Host belonging to a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(rename = "host")]
    pub id: HostId,
    pub name: String,
}

/// One side of a stretched cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDomain {
    pub name: String,
    pub hosts: BTreeSet<HostId>,
}

impl FaultDomain {
    pub fn contains(&self, host: &HostId) -> bool {
        self.hosts.contains(host)
    }
}

/// How many tags of one category an object may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    Single,
    Multiple,
}

/// Tag category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCategory {
    pub id: CategoryId,
    pub name: String,
    pub cardinality: Cardinality,
}

/// Parameters for creating a tag category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub description: String,
    pub cardinality: Cardinality,
    pub associable_types: Vec<String>,
}

/// Tag inside a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub category_id: CategoryId,
    pub name: String,
}

/// Listing entry for a compute policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySummary {
    #[serde(rename = "policy")]
    pub id: PolicyId,
    pub name: String,
}

/// VM-host affinity compute policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePolicy {
    pub id: PolicyId,
    pub name: String,
    pub description: String,
    /// Tag selecting the workloads the policy applies to
    pub vm_tag: TagId,
    /// Tag selecting the hosts those workloads must run on
    pub host_tag: TagId,
}

/// Parameters for creating a VM-host affinity compute policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePolicySpec {
    pub capability: String,
    pub name: String,
    pub description: String,
    pub vm_tag: TagId,
    pub host_tag: TagId,
}

/// Capability identifier of VM-host affinity compute policies
pub const VM_HOST_AFFINITY: &str = "com.vmware.vcenter.compute.policies.capabilities.vm_host_affinity";

/// Single capability requirement inside a storage policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub capability: String,
    pub value: String,
}

/// Rules that must all hold together ("AllOf")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

/// Storage placement policy; `rule_sets` are alternatives ("AnyOf")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicy {
    pub id: StoragePolicyId,
    pub name: String,
    pub description: String,
    pub rule_sets: Vec<RuleSet>,
}

/// Parameters for creating a storage policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicySpec {
    pub name: String,
    pub description: String,
    pub rule_sets: Vec<RuleSet>,
}
