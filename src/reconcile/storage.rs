//! Storage placement policies
//!
//! Each fault domain gets a storage policy named after it whose rules are
//! exactly the desired rule set plus the domain's locality. Comparison
//! against a pre-existing policy is exact: a missing, extra, or different
//! rule is a conflict.

use super::Reconciled;
use crate::error::{ResourceKind, Result, StretchError};
use crate::platform::{
    Cluster, FaultDomain, Platform, Rule, RuleSet, StoragePolicy, StoragePolicySpec,
};
use crate::policy::{Capability, DesiredRuleSet, Locality};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Placeholder for a rule present on only one side of a comparison
pub const ABSENT: &str = "<absent>";

enum Plan {
    Keep(StoragePolicy),
    Create(StoragePolicySpec, DesiredRuleSet),
}

/// Ensures one storage policy per fault domain
pub struct StoragePolicyReconciler<'a> {
    platform: &'a dyn Platform,
}

impl<'a> StoragePolicyReconciler<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Ensure a storage policy exists for every fault domain of `cluster`.
    ///
    /// `template` is never modified; every domain works on its own copy with
    /// the locality filled in.
    pub async fn ensure(
        &self,
        cluster: &Cluster,
        fault_domains: &[FaultDomain],
        template: &DesiredRuleSet,
    ) -> Result<Vec<Reconciled<StoragePolicy>>> {
        self.check_capabilities().await?;

        let preferred = self.platform.preferred_fault_domain(&cluster.id).await?;
        match preferred.as_deref() {
            None => warn!(
                "Cluster {} reports no preferred fault domain, every domain is secondary",
                cluster.name
            ),
            Some(name) if !fault_domains.iter().any(|d| d.name == name) => warn!(
                "Cluster {} prefers unknown fault domain {}, every domain is secondary",
                cluster.name, name
            ),
            Some(_) => {}
        }

        let mut plans = Vec::with_capacity(fault_domains.len());
        for domain in fault_domains {
            let locality = if preferred.as_deref() == Some(domain.name.as_str()) {
                Locality::Preferred
            } else {
                Locality::Secondary
            };
            let desired = template.for_domain(locality);

            let plan = match self.platform.find_storage_policy(&domain.name).await? {
                Some(policy) => {
                    compare(&policy, &desired)?;
                    debug!("Storage policy {} is compliant", policy.name);
                    Plan::Keep(policy)
                }
                None => Plan::Create(policy_spec(&domain.name, &desired), desired),
            };
            plans.push(plan);
        }

        let mut reconciled = Vec::with_capacity(plans.len());
        for plan in plans {
            match plan {
                Plan::Keep(policy) => reconciled.push(Reconciled::compliant(policy)),
                Plan::Create(spec, desired) => {
                    reconciled.push(self.create(cluster, &spec, &desired).await?)
                }
            }
        }

        Ok(reconciled)
    }

    /// Create a policy, or compare and adopt it if another pass created it first
    async fn create(
        &self,
        cluster: &Cluster,
        spec: &StoragePolicySpec,
        desired: &DesiredRuleSet,
    ) -> Result<Reconciled<StoragePolicy>> {
        match self.platform.create_storage_policy(spec).await {
            Ok(policy) => {
                info!(
                    "Created storage policy {} for cluster {}",
                    policy.name, cluster.name
                );
                Ok(Reconciled::created(policy))
            }
            Err(StretchError::AlreadyExists(_)) => {
                let policy = self
                    .platform
                    .find_storage_policy(&spec.name)
                    .await?
                    .ok_or_else(|| {
                        StretchError::platform(
                            "create_storage_policy",
                            format!("policy {} reported as existing but not found", spec.name),
                        )
                    })?;
                compare(&policy, desired)?;
                debug!("Storage policy {} was created concurrently, adopting it", spec.name);
                Ok(Reconciled::compliant(policy))
            }
            Err(e) => Err(e),
        }
    }

    /// Every capability we write must be one the platform offers
    async fn check_capabilities(&self) -> Result<()> {
        let offered = self.platform.storage_capabilities().await?;

        for capability in Capability::ALL {
            if !offered.iter().any(|key| key == capability.key()) {
                return Err(StretchError::UnsupportedCapability(
                    capability.key().to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Policy with a single "AllOf" rule group wrapped in a one-member "AnyOf"
pub fn policy_spec(name: &str, desired: &DesiredRuleSet) -> StoragePolicySpec {
    let rules = desired
        .iter()
        .map(|(capability, value)| Rule {
            capability: capability.key().to_string(),
            value: value.to_wire(),
        })
        .collect();

    let locality = desired
        .locality()
        .map(|l| l.as_str())
        .unwrap_or(ABSENT);

    StoragePolicySpec {
        name: name.to_string(),
        description: format!("Keep objects in fault domain {} ({} locality)", name, locality),
        rule_sets: vec![RuleSet { rules }],
    }
}

fn conflict(policy: &StoragePolicy, field: &str, desired: &str, configured: &str) -> StretchError {
    StretchError::Conflict {
        kind: ResourceKind::StoragePolicy,
        resource: policy.name.clone(),
        field: field.to_string(),
        desired: desired.to_string(),
        configured: configured.to_string(),
    }
}

/// Rules of a policy as capability key -> value.
///
/// Only the single-rule-set shape this crate creates is accepted: another
/// "AnyOf" alternative or a repeated key could let objects escape the
/// domain, so both are conflicts.
fn flatten(policy: &StoragePolicy) -> Result<BTreeMap<&str, &str>> {
    let [rule_set] = policy.rule_sets.as_slice() else {
        return Err(conflict(
            policy,
            "rule_sets",
            "1",
            &policy.rule_sets.len().to_string(),
        ));
    };

    let mut rules = BTreeMap::new();
    for rule in &rule_set.rules {
        if let Some(first) = rules.insert(rule.capability.as_str(), rule.value.as_str()) {
            return Err(conflict(
                policy,
                &rule.capability,
                "a single rule",
                &format!("{}, {}", first, rule.value),
            ));
        }
    }
    Ok(rules)
}

/// Fail on the first rule that differs between `policy` and `desired`
fn compare(policy: &StoragePolicy, desired: &DesiredRuleSet) -> Result<()> {
    let configured = flatten(policy)?;

    for (capability, value) in desired.iter() {
        let wanted = value.to_wire();
        match configured.get(capability.key()) {
            Some(actual) if *actual == wanted => {}
            Some(actual) => return Err(conflict(policy, capability.key(), &wanted, actual)),
            None => return Err(conflict(policy, capability.key(), &wanted, ABSENT)),
        }
    }

    for (&key, &actual) in &configured {
        let known = Capability::from_key(key).and_then(|c| desired.get(c));
        if known.is_none() {
            return Err(conflict(policy, key, ABSENT, actual));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::two_domain_fixture;
    use crate::platform::{InMemoryPlatform, Mutation};
    use crate::policy::FaultTolerance;

    async fn cluster_and_domains(platform: &InMemoryPlatform) -> (Cluster, Vec<FaultDomain>) {
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        let domains = platform.list_fault_domains(&cluster.id).await.unwrap();
        (cluster, domains)
    }

    fn wire(policy: &StoragePolicy, key: &str) -> Option<String> {
        flatten(policy).unwrap().get(key).map(|v| v.to_string())
    }

    #[tokio::test]
    async fn test_localities_are_independent_per_domain() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();

        let policies = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap();

        assert_eq!(policies.len(), 2);
        let a = &policies[0].resource;
        let b = &policies[1].resource;
        assert_eq!(a.name, "DomainA");
        assert_eq!(wire(a, "VSAN.locality").as_deref(), Some("Preferred"));
        assert_eq!(wire(b, "VSAN.locality").as_deref(), Some("Secondary"));
        assert_eq!(a.rule_sets.len(), 1);
        assert_eq!(a.rule_sets[0].rules.len(), 3);
        assert_eq!(template.locality(), None);
    }

    #[tokio::test]
    async fn test_explicit_failures_reach_the_policy() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Mirror { failures: 2 }).unwrap();

        let policies = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap();

        for policy in &policies {
            assert_eq!(
                wire(&policy.resource, "VSAN.subFailuresToTolerate").as_deref(),
                Some("2")
            );
            assert_eq!(
                wire(&policy.resource, "VSAN.replicaPreference").as_deref(),
                Some("RAID-1 (Mirroring) - Performance")
            );
        }
    }

    #[tokio::test]
    async fn test_compliant_policies_are_kept() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Raid5).unwrap();
        let reconciler = StoragePolicyReconciler::new(&platform);

        reconciler.ensure(&cluster, &domains, &template).await.unwrap();
        let second = reconciler.ensure(&cluster, &domains, &template).await.unwrap();

        assert!(second.iter().all(|p| !p.is_created()));
        assert_eq!(
            platform
                .journal()
                .unwrap()
                .iter()
                .filter(|m| matches!(m, Mutation::CreateStoragePolicy { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_drifted_value_is_a_conflict() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();
        let mut spec = policy_spec("DomainB", &template.for_domain(Locality::Preferred));
        spec.description = "hand made".to_string();
        platform.seed_storage_policy(&spec).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        match err {
            StretchError::Conflict {
                resource,
                field,
                desired,
                configured,
                ..
            } => {
                assert_eq!(resource, "DomainB");
                assert_eq!(field, "VSAN.locality");
                assert_eq!(desired, "Secondary");
                assert_eq!(configured, "Preferred");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        // DomainA was missing but nothing gets created once a conflict is seen.
        assert!(platform.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_rule_is_a_conflict() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();
        let mut spec = policy_spec("DomainA", &template.for_domain(Locality::Preferred));
        spec.rule_sets[0]
            .rules
            .retain(|r| r.capability != "VSAN.locality");
        platform.seed_storage_policy(&spec).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(err.to_string().contains(ABSENT));
    }

    #[tokio::test]
    async fn test_extra_rule_is_a_conflict() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();
        let mut spec = policy_spec("DomainA", &template.for_domain(Locality::Preferred));
        spec.rule_sets[0].rules.push(Rule {
            capability: "VSAN.stripeWidth".to_string(),
            value: "2".to_string(),
        });
        platform.seed_storage_policy(&spec).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        match err {
            StretchError::Conflict { field, desired, .. } => {
                assert_eq!(field, "VSAN.stripeWidth");
                assert_eq!(desired, ABSENT);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_rule_set_is_a_conflict() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();
        let secondary = policy_spec("DomainA", &template.for_domain(Locality::Secondary));
        let mut spec = policy_spec("DomainA", &template.for_domain(Locality::Preferred));
        spec.rule_sets.insert(0, secondary.rule_sets[0].clone());
        platform.seed_storage_policy(&spec).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        match err {
            StretchError::Conflict {
                resource,
                field,
                desired,
                configured,
                ..
            } => {
                assert_eq!(resource, "DomainA");
                assert_eq!(field, "rule_sets");
                assert_eq!(desired, "1");
                assert_eq!(configured, "2");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(platform.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_rule_is_a_conflict() {
        let (platform, _) = two_domain_fixture();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();
        let mut spec = policy_spec("DomainA", &template.for_domain(Locality::Preferred));
        spec.rule_sets[0].rules.insert(
            0,
            Rule {
                capability: "VSAN.locality".to_string(),
                value: "Secondary".to_string(),
            },
        );
        platform.seed_storage_policy(&spec).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        match err {
            StretchError::Conflict {
                field, configured, ..
            } => {
                assert_eq!(field, "VSAN.locality");
                assert_eq!(configured, "Secondary, Preferred");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(platform.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_preferred_domain_means_all_secondary() {
        let platform = InMemoryPlatform::new();
        let id = platform.seed_cluster("odd", Some("Elsewhere")).unwrap();
        platform.seed_fault_domain(&id, "Left", &["h1"]).unwrap();
        platform.seed_fault_domain(&id, "Right", &["h2"]).unwrap();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();

        let policies = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap();

        assert_eq!(policies.len(), 2);
        for policy in &policies {
            assert_eq!(
                wire(&policy.resource, "VSAN.locality").as_deref(),
                Some("Secondary")
            );
        }
    }

    #[tokio::test]
    async fn test_unsupported_capability() {
        let (platform, _) = two_domain_fixture();
        platform
            .set_capabilities(&["VSAN.replicaPreference", "VSAN.subFailuresToTolerate"])
            .unwrap();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        assert!(matches!(err, StretchError::UnsupportedCapability(ref key) if key == "VSAN.locality"));
    }

    #[tokio::test]
    async fn test_no_preferred_domain_means_all_secondary() {
        let platform = InMemoryPlatform::new();
        let id = platform.seed_cluster("plain", None).unwrap();
        platform.seed_fault_domain(&id, "Left", &["h1"]).unwrap();
        platform.seed_fault_domain(&id, "Right", &["h2"]).unwrap();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();

        let policies = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap();

        for policy in &policies {
            assert_eq!(
                wire(&policy.resource, "VSAN.locality").as_deref(),
                Some("Secondary")
            );
        }
    }

    #[tokio::test]
    async fn test_policy_created_concurrently_is_adopted() {
        let (platform, _) = two_domain_fixture();
        platform.lose_create_races(true).unwrap();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();

        let policies = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap();

        assert!(policies.iter().all(|p| !p.is_created()));
        assert_eq!(platform.storage_policies().unwrap().len(), 2);
        assert!(platform.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let (platform, _) = two_domain_fixture();
        platform.fail_operation("create_storage_policy").unwrap();
        let (cluster, domains) = cluster_and_domains(&platform).await;
        let template = DesiredRuleSet::build(FaultTolerance::Default).unwrap();

        let err = StoragePolicyReconciler::new(&platform)
            .ensure(&cluster, &domains, &template)
            .await
            .unwrap_err();

        assert!(matches!(err, StretchError::Platform { ref operation, .. } if operation == "create_storage_policy"));
        assert!(platform.storage_policies().unwrap().is_empty());
    }
}
