//! Inventory files for rehearsals
//!
//! An inventory describes clusters and any resources that already exist on
//! the platform. Loading it into an [`InMemoryPlatform`] lets a full pass run
//! without touching a real management endpoint.
//!
//! ```yaml
//! clusters:
//!   - name: stretch-01
//!     preferred: DomainA
//!     fault_domains:
//!       DomainA: [esx-a1, esx-a2]
//!       DomainB: [esx-b1, esx-b2]
//! categories:
//!   - name: AZ
//!     tags: [DomainA]
//!     attachments:
//!       esx-a1: [DomainA]
//! compute_policies:
//!   - name: DomainA
//!     vm_tag: AZ/DomainA
//!     host_tag: AZ/DomainA
//! ```

use super::memory::InMemoryPlatform;
use super::types::*;
use crate::error::{Result, StretchError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Whole inventory file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub clusters: Vec<ClusterEntry>,
    pub categories: Vec<CategoryEntry>,
    pub compute_policies: Vec<ComputePolicyEntry>,
    pub storage_policies: Vec<StoragePolicyEntry>,
    /// Storage capability keys offered; every known key when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub name: String,
    /// Fault domain the storage fabric prefers
    #[serde(default)]
    pub preferred: Option<String>,
    /// Fault domain name -> member host names
    #[serde(default)]
    pub fault_domains: BTreeMap<String, Vec<String>>,
    /// Hosts outside every fault domain
    #[serde(default)]
    pub unplaced_hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Host name -> tags of this category attached to it
    #[serde(default)]
    pub attachments: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePolicyEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `category/tag`
    pub vm_tag: String,
    /// `category/tag`
    pub host_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePolicyEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Capability key -> wire value
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
}

impl Inventory {
    /// Parse an inventory file
    pub fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StretchError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_str(&content)
    }

    /// Parse an inventory from YAML text
    pub fn parse_str(content: &str) -> Result<Self> {
        let inventory: Inventory = serde_yaml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<()> {
        for cluster in &self.clusters {
            if let Some(preferred) = &cluster.preferred {
                if !cluster.fault_domains.contains_key(preferred) {
                    return Err(StretchError::InvalidConfig(format!(
                        "cluster {} prefers unknown fault domain {}",
                        cluster.name, preferred
                    )));
                }
            }
        }
        Ok(())
    }

    /// Seed a fresh in-memory platform with this inventory
    pub fn into_platform(self) -> Result<InMemoryPlatform> {
        let platform = InMemoryPlatform::new();

        for entry in &self.clusters {
            let id = platform.seed_cluster(&entry.name, entry.preferred.as_deref())?;
            for (domain, hosts) in &entry.fault_domains {
                let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();
                platform.seed_fault_domain(&id, domain, &hosts)?;
            }
            for host in &entry.unplaced_hosts {
                platform.seed_unplaced_host(&id, host)?;
            }
        }

        let mut tags: HashMap<String, TagId> = HashMap::new();
        for entry in &self.categories {
            let category = platform.seed_category(&entry.name)?;
            for name in &entry.tags {
                let tag = platform.seed_tag(&category.id, name)?;
                tags.insert(format!("{}/{}", entry.name, name), tag.id);
            }

            for (host_name, attached) in &entry.attachments {
                let host = platform.host_id(host_name)?.ok_or_else(|| {
                    StretchError::InvalidConfig(format!("attachment to unknown host {}", host_name))
                })?;
                for name in attached {
                    let tag = resolve(&tags, &format!("{}/{}", entry.name, name))?;
                    platform.seed_attachment(tag, &host)?;
                }
            }
        }

        for entry in &self.compute_policies {
            platform.seed_compute_policy(&ComputePolicySpec {
                capability: VM_HOST_AFFINITY.to_string(),
                name: entry.name.clone(),
                description: entry.description.clone(),
                vm_tag: resolve(&tags, &entry.vm_tag)?.clone(),
                host_tag: resolve(&tags, &entry.host_tag)?.clone(),
            })?;
        }

        for entry in &self.storage_policies {
            let rules = entry
                .rules
                .iter()
                .map(|(capability, value)| Rule {
                    capability: capability.clone(),
                    value: value.clone(),
                })
                .collect();
            platform.seed_storage_policy(&StoragePolicySpec {
                name: entry.name.clone(),
                description: entry.description.clone(),
                rule_sets: vec![RuleSet { rules }],
            })?;
        }

        if let Some(capabilities) = &self.capabilities {
            let keys: Vec<&str> = capabilities.iter().map(String::as_str).collect();
            platform.set_capabilities(&keys)?;
        }

        tracing::debug!(
            "Seeded in-memory platform with {} cluster(s)",
            self.clusters.len()
        );
        Ok(platform)
    }
}

fn resolve<'a>(tags: &'a HashMap<String, TagId>, reference: &str) -> Result<&'a TagId> {
    tags.get(reference)
        .ok_or_else(|| StretchError::InvalidConfig(format!("unknown tag {}", reference)))
}
