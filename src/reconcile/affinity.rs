//! VM-host affinity rules
//!
//! Every fault domain gets a compute policy named after it that keeps
//! workloads tagged for the domain on hosts tagged for the same domain. A
//! pre-existing policy with different selectors is reported, never fixed:
//! correcting it could move running workloads.

use super::labels::DomainLabels;
use super::Reconciled;
use crate::error::{ResourceKind, Result, StretchError};
use crate::platform::{
    Cluster, ComputePolicy, ComputePolicySpec, Platform, Tag, VM_HOST_AFFINITY,
};
use tracing::{debug, info};

enum Plan {
    Keep(ComputePolicy),
    Create(ComputePolicySpec),
}

/// Ensures one affinity rule per fault domain
pub struct AffinityReconciler<'a> {
    platform: &'a dyn Platform,
}

impl<'a> AffinityReconciler<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Ensure an affinity rule exists for every labeled fault domain.
    ///
    /// All existing rules are verified before anything is created, so a
    /// conflict leaves the platform untouched.
    pub async fn ensure(
        &self,
        cluster: &Cluster,
        labels: &DomainLabels,
    ) -> Result<Vec<Reconciled<ComputePolicy>>> {
        let existing = self.platform.list_compute_policies().await?;

        let mut plans = Vec::with_capacity(labels.len());
        for (domain, tag) in labels.iter() {
            let plan = match existing.iter().find(|p| p.name == domain) {
                Some(summary) => {
                    let policy = self.platform.get_compute_policy(&summary.id).await?;
                    verify(&policy, tag)?;
                    debug!("Affinity rule {} on cluster {} is compliant", domain, cluster.name);
                    Plan::Keep(policy)
                }
                None => Plan::Create(rule_spec(domain, labels.category().name.as_str(), tag)),
            };
            plans.push(plan);
        }

        let mut reconciled = Vec::with_capacity(plans.len());
        for plan in plans {
            match plan {
                Plan::Keep(policy) => reconciled.push(Reconciled::compliant(policy)),
                Plan::Create(spec) => reconciled.push(self.create(cluster, spec, labels).await?),
            }
        }

        Ok(reconciled)
    }

    /// Create a rule, or verify and adopt it if another pass created it first
    async fn create(
        &self,
        cluster: &Cluster,
        spec: ComputePolicySpec,
        labels: &DomainLabels,
    ) -> Result<Reconciled<ComputePolicy>> {
        match self.platform.create_compute_policy(&spec).await {
            Ok(id) => {
                info!("Created affinity rule {} for cluster {}", spec.name, cluster.name);
                Ok(Reconciled::created(ComputePolicy {
                    id,
                    name: spec.name,
                    description: spec.description,
                    vm_tag: spec.vm_tag,
                    host_tag: spec.host_tag,
                }))
            }
            Err(StretchError::AlreadyExists(_)) => {
                let summary = self
                    .platform
                    .list_compute_policies()
                    .await?
                    .into_iter()
                    .find(|p| p.name == spec.name)
                    .ok_or_else(|| {
                        StretchError::platform(
                            "create_compute_policy",
                            format!("rule {} reported as existing but not found", spec.name),
                        )
                    })?;
                let policy = self.platform.get_compute_policy(&summary.id).await?;
                verify(&policy, labels.require(&spec.name)?)?;
                debug!("Affinity rule {} was created concurrently, adopting it", spec.name);
                Ok(Reconciled::compliant(policy))
            }
            Err(e) => Err(e),
        }
    }
}

/// Rule binding workloads and hosts carrying `tag`
fn rule_spec(domain: &str, category: &str, tag: &Tag) -> ComputePolicySpec {
    ComputePolicySpec {
        capability: VM_HOST_AFFINITY.to_string(),
        name: domain.to_string(),
        description: format!(
            "Run workloads tagged {}:{} on hosts tagged {}:{}",
            category, tag.name, category, tag.name
        ),
        vm_tag: tag.id.clone(),
        host_tag: tag.id.clone(),
    }
}

/// Both selectors must point at the domain's own tag
fn verify(policy: &ComputePolicy, tag: &Tag) -> Result<()> {
    let selectors = [("vm_tag", &policy.vm_tag), ("host_tag", &policy.host_tag)];

    for (field, configured) in selectors {
        if configured != &tag.id {
            return Err(StretchError::Conflict {
                kind: ResourceKind::AffinityRule,
                resource: policy.name.clone(),
                field: field.to_string(),
                desired: tag.id.to_string(),
                configured: configured.to_string(),
            });
        }
    }

    Ok(())
}
