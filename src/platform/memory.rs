//! In-memory management platform
//!
//! Keeps the whole inventory behind a lock and records every mutation made
//! through the [`Platform`] trait, so a pass can be inspected afterwards.
//! `seed_*` methods describe pre-existing state and are not journaled.

use super::types::*;
use super::Platform;
use crate::error::{Result, StretchError};
use crate::policy::Capability;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Mutation performed through the platform trait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateCategory { name: String },
    CreateTag { category: CategoryId, name: String },
    AttachTag { tag: TagId, host: HostId },
    CreateComputePolicy { name: String },
    CreateStoragePolicy { name: String },
}

impl std::fmt::Display for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mutation::CreateCategory { name } => write!(f, "create category {}", name),
            Mutation::CreateTag { category, name } => {
                write!(f, "create tag {} in category {}", name, category)
            }
            Mutation::AttachTag { tag, host } => write!(f, "attach tag {} to host {}", tag, host),
            Mutation::CreateComputePolicy { name } => write!(f, "create affinity rule {}", name),
            Mutation::CreateStoragePolicy { name } => write!(f, "create storage policy {}", name),
        }
    }
}

#[derive(Debug, Clone)]
struct ClusterRecord {
    cluster: Cluster,
    hosts: Vec<Host>,
    fault_domains: Vec<FaultDomain>,
    preferred: Option<String>,
}

#[derive(Debug)]
struct State {
    clusters: Vec<ClusterRecord>,
    categories: BTreeMap<CategoryId, TagCategory>,
    tags: BTreeMap<TagId, Tag>,
    attachments: BTreeMap<HostId, BTreeSet<TagId>>,
    compute_policies: BTreeMap<PolicyId, ComputePolicy>,
    storage_policies: BTreeMap<StoragePolicyId, StoragePolicy>,
    capabilities: Vec<String>,
    journal: Vec<Mutation>,
    failing: HashSet<String>,
    lose_create_races: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            categories: BTreeMap::new(),
            tags: BTreeMap::new(),
            attachments: BTreeMap::new(),
            compute_policies: BTreeMap::new(),
            storage_policies: BTreeMap::new(),
            capabilities: Capability::ALL.iter().map(|c| c.key().to_string()).collect(),
            journal: Vec::new(),
            failing: HashSet::new(),
            lose_create_races: false,
        }
    }
}

impl State {
    fn check(&self, operation: &str) -> Result<()> {
        if self.failing.contains(operation) {
            return Err(StretchError::platform(operation, "injected failure"));
        }
        Ok(())
    }

    fn cluster(&self, id: &ClusterId) -> Result<&ClusterRecord> {
        self.clusters
            .iter()
            .find(|c| &c.cluster.id == id)
            .ok_or_else(|| StretchError::NotFound(format!("cluster {}", id)))
    }

    fn category_by_name(&self, name: &str) -> Option<&TagCategory> {
        self.categories.values().find(|c| c.name == name)
    }

    fn tag_by_name(&self, category: &CategoryId, name: &str) -> Option<&Tag> {
        self.tags
            .values()
            .find(|t| &t.category_id == category && t.name == name)
    }

    fn insert_category(&mut self, spec: &CategorySpec) -> TagCategory {
        let category = TagCategory {
            id: CategoryId::new(new_id("category")),
            name: spec.name.clone(),
            cardinality: spec.cardinality,
        };
        self.categories.insert(category.id.clone(), category.clone());
        category
    }

    fn insert_tag(&mut self, category: &CategoryId, name: &str) -> Tag {
        let tag = Tag {
            id: TagId::new(new_id("tag")),
            category_id: category.clone(),
            name: name.to_string(),
        };
        self.tags.insert(tag.id.clone(), tag.clone());
        tag
    }

    fn insert_compute_policy(&mut self, spec: &ComputePolicySpec) -> PolicyId {
        let policy = ComputePolicy {
            id: PolicyId::new(new_id("policy")),
            name: spec.name.clone(),
            description: spec.description.clone(),
            vm_tag: spec.vm_tag.clone(),
            host_tag: spec.host_tag.clone(),
        };
        let id = policy.id.clone();
        self.compute_policies.insert(id.clone(), policy);
        id
    }

    fn insert_storage_policy(&mut self, spec: &StoragePolicySpec) -> StoragePolicy {
        let policy = StoragePolicy {
            id: StoragePolicyId::new(new_id("storage-policy")),
            name: spec.name.clone(),
            description: spec.description.clone(),
            rule_sets: spec.rule_sets.clone(),
        };
        self.storage_policies
            .insert(policy.id.clone(), policy.clone());
        policy
    }
}

/// In-memory [`Platform`] implementation
#[derive(Debug, Default)]
pub struct InMemoryPlatform {
    state: RwLock<State>,
}

impl InMemoryPlatform {
    /// Create an empty platform offering every known storage capability
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StretchError::Lock("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StretchError::Lock("Failed to acquire write lock".to_string()))
    }

    /// Add a cluster with no hosts or fault domains yet
    pub fn seed_cluster(&self, name: &str, preferred: Option<&str>) -> Result<ClusterId> {
        let mut state = self.write()?;

        let cluster = Cluster {
            id: ClusterId::new(new_id("domain-c")),
            name: name.to_string(),
        };
        let id = cluster.id.clone();
        state.clusters.push(ClusterRecord {
            cluster,
            hosts: Vec::new(),
            fault_domains: Vec::new(),
            preferred: preferred.map(str::to_string),
        });
        Ok(id)
    }

    /// Add a fault domain and its member hosts to a cluster
    pub fn seed_fault_domain(
        &self,
        cluster: &ClusterId,
        domain: &str,
        host_names: &[&str],
    ) -> Result<Vec<HostId>> {
        let mut state = self.write()?;
        let record = state
            .clusters
            .iter_mut()
            .find(|c| &c.cluster.id == cluster)
            .ok_or_else(|| StretchError::NotFound(format!("cluster {}", cluster)))?;

        let mut ids = Vec::new();
        for host_name in host_names {
            let host = Host {
                id: HostId::new(new_id("host")),
                name: host_name.to_string(),
            };
            ids.push(host.id.clone());
            record.hosts.push(host);
        }
        record.fault_domains.push(FaultDomain {
            name: domain.to_string(),
            hosts: ids.iter().cloned().collect(),
        });
        Ok(ids)
    }

    /// Add a host to a cluster without placing it in any fault domain
    pub fn seed_unplaced_host(&self, cluster: &ClusterId, name: &str) -> Result<HostId> {
        let mut state = self.write()?;
        let record = state
            .clusters
            .iter_mut()
            .find(|c| &c.cluster.id == cluster)
            .ok_or_else(|| StretchError::NotFound(format!("cluster {}", cluster)))?;

        let host = Host {
            id: HostId::new(new_id("host")),
            name: name.to_string(),
        };
        let id = host.id.clone();
        record.hosts.push(host);
        Ok(id)
    }

    pub fn seed_category(&self, name: &str) -> Result<TagCategory> {
        let mut state = self.write()?;
        Ok(state.insert_category(&CategorySpec {
            name: name.to_string(),
            description: String::new(),
            cardinality: Cardinality::Multiple,
            associable_types: Vec::new(),
        }))
    }

    pub fn seed_tag(&self, category: &CategoryId, name: &str) -> Result<Tag> {
        let mut state = self.write()?;
        Ok(state.insert_tag(category, name))
    }

    pub fn seed_attachment(&self, tag: &TagId, host: &HostId) -> Result<()> {
        let mut state = self.write()?;
        state
            .attachments
            .entry(host.clone())
            .or_default()
            .insert(tag.clone());
        Ok(())
    }

    pub fn seed_compute_policy(&self, spec: &ComputePolicySpec) -> Result<PolicyId> {
        let mut state = self.write()?;
        Ok(state.insert_compute_policy(spec))
    }

    pub fn seed_storage_policy(&self, spec: &StoragePolicySpec) -> Result<StoragePolicy> {
        let mut state = self.write()?;
        Ok(state.insert_storage_policy(spec))
    }

    /// Replace the set of storage capability keys the platform offers
    pub fn set_capabilities(&self, keys: &[&str]) -> Result<()> {
        let mut state = self.write()?;
        state.capabilities = keys.iter().map(|k| k.to_string()).collect();
        Ok(())
    }

    /// Make every call of the named operation fail
    pub fn fail_operation(&self, operation: &str) -> Result<()> {
        let mut state = self.write()?;
        state.failing.insert(operation.to_string());
        Ok(())
    }

    /// Behave as if another client always creates the same resource
    /// between our lookup and our create
    pub fn lose_create_races(&self, enabled: bool) -> Result<()> {
        let mut state = self.write()?;
        state.lose_create_races = enabled;
        Ok(())
    }

    /// Mutations performed through the platform trait, in order
    pub fn journal(&self) -> Result<Vec<Mutation>> {
        Ok(self.read()?.journal.clone())
    }

    pub fn host_id(&self, name: &str) -> Result<Option<HostId>> {
        let state = self.read()?;
        Ok(state
            .clusters
            .iter()
            .flat_map(|c| c.hosts.iter())
            .find(|h| h.name == name)
            .map(|h| h.id.clone()))
    }

    pub fn categories(&self) -> Result<Vec<TagCategory>> {
        Ok(self.read()?.categories.values().cloned().collect())
    }

    /// Tags in the category with the given name
    pub fn tags_in(&self, category: &str) -> Result<Vec<Tag>> {
        let state = self.read()?;
        let Some(category) = state.category_by_name(category) else {
            return Ok(Vec::new());
        };
        Ok(state
            .tags
            .values()
            .filter(|t| t.category_id == category.id)
            .cloned()
            .collect())
    }

    /// Tags attached to a host, across all categories
    pub fn attached(&self, host: &HostId) -> Result<Vec<Tag>> {
        let state = self.read()?;
        Ok(state
            .attachments
            .get(host)
            .into_iter()
            .flatten()
            .filter_map(|id| state.tags.get(id).cloned())
            .collect())
    }

    pub fn compute_policies(&self) -> Result<Vec<ComputePolicy>> {
        Ok(self.read()?.compute_policies.values().cloned().collect())
    }

    pub fn storage_policies(&self) -> Result<Vec<StoragePolicy>> {
        Ok(self.read()?.storage_policies.values().cloned().collect())
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn list_clusters(&self, name: Option<&str>) -> Result<Vec<Cluster>> {
        let state = self.read()?;
        state.check("list_clusters")?;

        Ok(state
            .clusters
            .iter()
            .filter(|c| name.map_or(true, |n| c.cluster.name == n))
            .map(|c| c.cluster.clone())
            .collect())
    }

    async fn list_hosts(&self, cluster: &ClusterId) -> Result<Vec<Host>> {
        let state = self.read()?;
        state.check("list_hosts")?;
        Ok(state.cluster(cluster)?.hosts.clone())
    }

    async fn list_fault_domains(&self, cluster: &ClusterId) -> Result<Vec<FaultDomain>> {
        let state = self.read()?;
        state.check("list_fault_domains")?;
        Ok(state.cluster(cluster)?.fault_domains.clone())
    }

    async fn preferred_fault_domain(&self, cluster: &ClusterId) -> Result<Option<String>> {
        let state = self.read()?;
        state.check("preferred_fault_domain")?;
        Ok(state.cluster(cluster)?.preferred.clone())
    }

    async fn find_category(&self, name: &str) -> Result<Option<TagCategory>> {
        let state = self.read()?;
        state.check("find_category")?;
        Ok(state.category_by_name(name).cloned())
    }

    async fn create_category(&self, spec: &CategorySpec) -> Result<TagCategory> {
        let mut state = self.write()?;
        state.check("create_category")?;

        if state.lose_create_races && state.category_by_name(&spec.name).is_none() {
            state.insert_category(spec);
        }
        if state.category_by_name(&spec.name).is_some() {
            return Err(StretchError::AlreadyExists(format!("category {}", spec.name)));
        }

        state.journal.push(Mutation::CreateCategory {
            name: spec.name.clone(),
        });
        Ok(state.insert_category(spec))
    }

    async fn find_tag(&self, category: &CategoryId, name: &str) -> Result<Option<Tag>> {
        let state = self.read()?;
        state.check("find_tag")?;
        Ok(state.tag_by_name(category, name).cloned())
    }

    async fn create_tag(&self, category: &CategoryId, name: &str) -> Result<Tag> {
        let mut state = self.write()?;
        state.check("create_tag")?;

        if !state.categories.contains_key(category) {
            return Err(StretchError::NotFound(format!("category {}", category)));
        }
        if state.lose_create_races && state.tag_by_name(category, name).is_none() {
            state.insert_tag(category, name);
        }
        if state.tag_by_name(category, name).is_some() {
            return Err(StretchError::AlreadyExists(format!("tag {}", name)));
        }

        state.journal.push(Mutation::CreateTag {
            category: category.clone(),
            name: name.to_string(),
        });
        Ok(state.insert_tag(category, name))
    }

    async fn list_attached_tags(
        &self,
        host: &HostId,
        category: &CategoryId,
    ) -> Result<Vec<TagId>> {
        let state = self.read()?;
        state.check("list_attached_tags")?;

        Ok(state
            .attachments
            .get(host)
            .into_iter()
            .flatten()
            .filter(|id| {
                state
                    .tags
                    .get(*id)
                    .map_or(false, |t| &t.category_id == category)
            })
            .cloned()
            .collect())
    }

    async fn attach_tag(&self, tag: &TagId, host: &HostId) -> Result<()> {
        let mut state = self.write()?;
        state.check("attach_tag")?;

        if !state.tags.contains_key(tag) {
            return Err(StretchError::NotFound(format!("tag {}", tag)));
        }

        let inserted = state
            .attachments
            .entry(host.clone())
            .or_default()
            .insert(tag.clone());
        if inserted {
            state.journal.push(Mutation::AttachTag {
                tag: tag.clone(),
                host: host.clone(),
            });
        }
        Ok(())
    }

    async fn list_compute_policies(&self) -> Result<Vec<PolicySummary>> {
        let state = self.read()?;
        state.check("list_compute_policies")?;

        Ok(state
            .compute_policies
            .values()
            .map(|p| PolicySummary {
                id: p.id.clone(),
                name: p.name.clone(),
            })
            .collect())
    }

    async fn get_compute_policy(&self, id: &PolicyId) -> Result<ComputePolicy> {
        let state = self.read()?;
        state.check("get_compute_policy")?;

        state
            .compute_policies
            .get(id)
            .cloned()
            .ok_or_else(|| StretchError::NotFound(format!("compute policy {}", id)))
    }

    async fn create_compute_policy(&self, spec: &ComputePolicySpec) -> Result<PolicyId> {
        let mut state = self.write()?;
        state.check("create_compute_policy")?;

        let exists = |state: &State| state.compute_policies.values().any(|p| p.name == spec.name);
        if state.lose_create_races && !exists(&*state) {
            state.insert_compute_policy(spec);
        }
        if exists(&*state) {
            return Err(StretchError::AlreadyExists(format!(
                "compute policy {}",
                spec.name
            )));
        }

        state.journal.push(Mutation::CreateComputePolicy {
            name: spec.name.clone(),
        });
        Ok(state.insert_compute_policy(spec))
    }

    async fn find_storage_policy(&self, name: &str) -> Result<Option<StoragePolicy>> {
        let state = self.read()?;
        state.check("find_storage_policy")?;

        Ok(state
            .storage_policies
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn create_storage_policy(&self, spec: &StoragePolicySpec) -> Result<StoragePolicy> {
        let mut state = self.write()?;
        state.check("create_storage_policy")?;

        let exists = |state: &State| state.storage_policies.values().any(|p| p.name == spec.name);
        if state.lose_create_races && !exists(&*state) {
            state.insert_storage_policy(spec);
        }
        if exists(&*state) {
            return Err(StretchError::AlreadyExists(format!(
                "storage policy {}",
                spec.name
            )));
        }

        state.journal.push(Mutation::CreateStoragePolicy {
            name: spec.name.clone(),
        });
        Ok(state.insert_storage_policy(spec))
    }

    async fn storage_capabilities(&self) -> Result<Vec<String>> {
        let state = self.read()?;
        state.check("storage_capabilities")?;
        Ok(state.capabilities.clone())
    }
}

fn new_id(prefix: &str) -> String {
    let random = Uuid::new_v4().to_string().replace('-', "");
    format!("{}-{}", prefix, &random[..12])
}

/// Stretched cluster "stretch-01" with hosts esx-a1/esx-a2 in DomainA and
/// esx-b1/esx-b2 in DomainB; DomainA is preferred.
#[cfg(test)]
pub(crate) fn two_domain_fixture() -> (InMemoryPlatform, ClusterId) {
    let platform = InMemoryPlatform::new();
    let cluster = platform
        .seed_cluster("stretch-01", Some("DomainA"))
        .expect("seed cluster");
    platform
        .seed_fault_domain(&cluster, "DomainA", &["esx-a1", "esx-a2"])
        .expect("seed DomainA");
    platform
        .seed_fault_domain(&cluster, "DomainB", &["esx-b1", "esx-b2"])
        .expect("seed DomainB");
    (platform, cluster)
}
