//! Cluster management platform boundary
//!
//! Every read and mutation the reconcilers perform goes through the
//! [`Platform`] trait. Two implementations ship with the crate: an HTTP
//! client for the real management API and an in-memory model used by tests
//! and by inventory rehearsals.

pub mod inventory;
pub mod memory;
pub mod rest;
pub mod types;

pub use inventory::Inventory;
pub use memory::{InMemoryPlatform, Mutation};
pub use rest::{RestPlatform, RestSettings};
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;

/// Capabilities consumed from the cluster management platform.
///
/// Calls either complete or fail within the platform's own timeout; none of
/// them are retried by the caller.
#[async_trait]
pub trait Platform: Send + Sync {
    /// List clusters, optionally restricted to an exact name
    async fn list_clusters(&self, name: Option<&str>) -> Result<Vec<Cluster>>;

    /// List hosts of a cluster
    async fn list_hosts(&self, cluster: &ClusterId) -> Result<Vec<Host>>;

    /// List the fault domains of a cluster
    async fn list_fault_domains(&self, cluster: &ClusterId) -> Result<Vec<FaultDomain>>;

    /// Name of the fault domain the storage fabric prefers for a cluster
    async fn preferred_fault_domain(&self, cluster: &ClusterId) -> Result<Option<String>>;

    /// Find a tag category by name
    async fn find_category(&self, name: &str) -> Result<Option<TagCategory>>;

    /// Create a tag category
    async fn create_category(&self, spec: &CategorySpec) -> Result<TagCategory>;

    /// Find a tag by category and name
    async fn find_tag(&self, category: &CategoryId, name: &str) -> Result<Option<Tag>>;

    /// Create a tag in a category
    async fn create_tag(&self, category: &CategoryId, name: &str) -> Result<Tag>;

    /// Tags of one category attached to a host
    async fn list_attached_tags(&self, host: &HostId, category: &CategoryId)
        -> Result<Vec<TagId>>;

    /// Attach a tag to a host
    async fn attach_tag(&self, tag: &TagId, host: &HostId) -> Result<()>;

    /// List compute policies
    async fn list_compute_policies(&self) -> Result<Vec<PolicySummary>>;

    /// Fetch a compute policy
    async fn get_compute_policy(&self, id: &PolicyId) -> Result<ComputePolicy>;

    /// Create a compute policy
    async fn create_compute_policy(&self, spec: &ComputePolicySpec) -> Result<PolicyId>;

    /// Find a storage policy by name
    async fn find_storage_policy(&self, name: &str) -> Result<Option<StoragePolicy>>;

    /// Create a storage policy in a single call
    async fn create_storage_policy(&self, spec: &StoragePolicySpec) -> Result<StoragePolicy>;

    /// Storage capability keys the platform accepts in rules
    async fn storage_capabilities(&self) -> Result<Vec<String>>;
}
