//! One reconciliation pass over a single cluster

use crate::error::{Result, StretchError};
use crate::platform::{Cluster, ComputePolicy, Platform, StoragePolicy, Tag};
use crate::policy::DesiredRuleSet;
use crate::reconcile::{
    AffinityReconciler, HostAssignment, HostLabelAssigner, LabelReconciler, Outcome, Reconciled,
    StoragePolicyReconciler, Touched,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default tag category holding the fault-domain tags
pub const DEFAULT_CATEGORY: &str = "AZ";

/// Options shared by every cluster pass of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOptions {
    /// Tag category holding one tag per fault domain
    pub category: String,
    /// Collect every touched resource for the caller to display
    pub passthru: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            passthru: false,
        }
    }
}

/// What a completed pass did to one cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterReport {
    pub cluster: Cluster,
    pub category: Outcome,
    pub labels: Vec<Reconciled<Tag>>,
    pub affinity: Vec<Reconciled<ComputePolicy>>,
    pub hosts: Vec<Reconciled<HostAssignment>>,
    pub storage: Vec<Reconciled<StoragePolicy>>,
    /// Touched resources, only filled when pass-through is enabled
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub passthru: Vec<Touched>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ClusterReport {
    /// Number of resources created by the pass, category included
    pub fn created(&self) -> usize {
        let category = usize::from(self.category == Outcome::Created);
        category
            + count(&self.labels, Outcome::Created)
            + count(&self.affinity, Outcome::Created)
            + count(&self.hosts, Outcome::Created)
            + count(&self.storage, Outcome::Created)
    }

    /// Number of resources that already matched, category included
    pub fn compliant(&self) -> usize {
        let category = usize::from(self.category == Outcome::Compliant);
        category
            + count(&self.labels, Outcome::Compliant)
            + count(&self.affinity, Outcome::Compliant)
            + count(&self.hosts, Outcome::Compliant)
            + count(&self.storage, Outcome::Compliant)
    }
}

fn count<T>(items: &[Reconciled<T>], outcome: Outcome) -> usize {
    items.iter().filter(|i| i.outcome == outcome).count()
}

/// Runs labels -> affinity rules -> host labels -> storage policies for one
/// cluster, stopping at the first failure
pub struct ClusterPass<'a> {
    platform: &'a dyn Platform,
    options: &'a PassOptions,
    template: &'a DesiredRuleSet,
}

impl<'a> ClusterPass<'a> {
    pub fn new(
        platform: &'a dyn Platform,
        options: &'a PassOptions,
        template: &'a DesiredRuleSet,
    ) -> Self {
        Self {
            platform,
            options,
            template,
        }
    }

    /// Reconcile one cluster
    pub async fn run(&self, cluster: &Cluster) -> Result<ClusterReport> {
        let started_at = Utc::now();
        tracing::info!("Reconciling cluster {}", cluster.name);

        let fault_domains = self.platform.list_fault_domains(&cluster.id).await?;
        if fault_domains.is_empty() {
            return Err(StretchError::InvalidConfig(format!(
                "cluster {} has no fault domains and is not stretched",
                cluster.name
            )));
        }
        let hosts = self.platform.list_hosts(&cluster.id).await?;
        tracing::debug!(
            "Cluster {} has {} fault domains and {} hosts",
            cluster.name,
            fault_domains.len(),
            hosts.len()
        );

        let label_report = LabelReconciler::new(self.platform)
            .ensure(&fault_domains, &self.options.category)
            .await?;
        let labels = &label_report.labels;

        let affinity = AffinityReconciler::new(self.platform)
            .ensure(cluster, labels)
            .await?;

        let assignments = HostLabelAssigner::new(self.platform)
            .ensure(cluster, &hosts, &fault_domains, labels)
            .await?;

        let storage = StoragePolicyReconciler::new(self.platform)
            .ensure(cluster, &fault_domains, self.template)
            .await?;

        let passthru = if self.options.passthru {
            collect_touched(&assignments, &affinity, &storage)
        } else {
            Vec::new()
        };

        let report = ClusterReport {
            cluster: cluster.clone(),
            category: label_report.category,
            labels: label_report.tags,
            affinity,
            hosts: assignments,
            storage,
            passthru,
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            "Cluster {} reconciled: {} created, {} compliant",
            cluster.name,
            report.created(),
            report.compliant()
        );
        Ok(report)
    }
}

fn collect_touched(
    assignments: &[Reconciled<HostAssignment>],
    affinity: &[Reconciled<ComputePolicy>],
    storage: &[Reconciled<StoragePolicy>],
) -> Vec<Touched> {
    let tags = assignments.iter().map(|a| Touched::TagAssignment {
        outcome: a.outcome,
        assignment: a.resource.clone(),
    });
    let rules = affinity.iter().map(|r| Touched::AffinityRule {
        outcome: r.outcome,
        policy: r.resource.clone(),
    });
    let policies = storage.iter().map(|p| Touched::StoragePolicy {
        outcome: p.outcome,
        policy: p.resource.clone(),
    });

    tags.chain(rules).chain(policies).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceKind;
    use crate::platform::memory::two_domain_fixture;
    use crate::platform::{ComputePolicySpec, Mutation, TagId, VM_HOST_AFFINITY};
    use crate::policy::{FaultTolerance, Locality, ReplicationMode};

    fn template() -> DesiredRuleSet {
        DesiredRuleSet::build(FaultTolerance::Default).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_cluster_default_options() {
        let (platform, _) = two_domain_fixture();
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        let options = PassOptions::default();
        let template = template();

        let report = ClusterPass::new(&platform, &options, &template)
            .run(&cluster)
            .await
            .unwrap();

        assert_eq!(report.category, Outcome::Created);
        assert_eq!(platform.categories().unwrap().len(), 1);
        assert_eq!(platform.tags_in("AZ").unwrap().len(), 2);

        let rules = platform.compute_policies().unwrap();
        assert_eq!(rules.len(), 2);
        for rule in &rules {
            assert_eq!(rule.vm_tag, rule.host_tag);
        }

        let policies = platform.storage_policies().unwrap();
        assert_eq!(policies.len(), 2);
        for reconciled in &report.storage {
            let expected = if reconciled.resource.name == "DomainA" {
                Locality::Preferred
            } else {
                Locality::Secondary
            };
            let rules = &reconciled.resource.rule_sets[0].rules;
            assert!(rules
                .iter()
                .any(|r| r.capability == "VSAN.locality" && r.value == expected.as_str()));
            assert!(rules.iter().any(|r| r.capability == "VSAN.replicaPreference"
                && r.value == ReplicationMode::Mirroring.as_str()));
            assert!(rules
                .iter()
                .any(|r| r.capability == "VSAN.subFailuresToTolerate" && r.value == "1"));
        }

        assert_eq!(report.hosts.len(), 4);
        assert!(report.hosts.iter().all(|h| h.is_created()));
        // category + 2 tags + 2 rules + 4 assignments + 2 policies
        assert_eq!(report.created(), 11);
        assert!(report.passthru.is_empty());
    }

    #[tokio::test]
    async fn test_second_pass_is_fully_compliant() {
        let (platform, _) = two_domain_fixture();
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        let options = PassOptions::default();
        let template = template();
        let pass = ClusterPass::new(&platform, &options, &template);

        pass.run(&cluster).await.unwrap();
        let journal = platform.journal().unwrap();
        let second = pass.run(&cluster).await.unwrap();

        assert_eq!(platform.journal().unwrap(), journal);
        assert_eq!(second.created(), 0);
        assert_eq!(second.compliant(), 11);
    }

    #[tokio::test]
    async fn test_affinity_conflict_stops_before_storage() {
        let (platform, _) = two_domain_fixture();
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        platform
            .seed_compute_policy(&ComputePolicySpec {
                capability: VM_HOST_AFFINITY.to_string(),
                name: "DomainA".to_string(),
                description: String::new(),
                vm_tag: TagId::new("some-other-label"),
                host_tag: TagId::new("some-other-label"),
            })
            .unwrap();
        let options = PassOptions::default();
        let template = template();

        let err = ClusterPass::new(&platform, &options, &template)
            .run(&cluster)
            .await
            .unwrap_err();

        match err {
            StretchError::Conflict { kind, resource, .. } => {
                assert_eq!(kind, ResourceKind::AffinityRule);
                assert_eq!(resource, "DomainA");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(platform.storage_policies().unwrap().is_empty());
        assert!(!platform
            .journal()
            .unwrap()
            .iter()
            .any(|m| matches!(m, Mutation::CreateComputePolicy { .. } | Mutation::AttachTag { .. })));
    }

    #[tokio::test]
    async fn test_passthru_lists_everything_touched() {
        let (platform, _) = two_domain_fixture();
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        let options = PassOptions {
            passthru: true,
            ..Default::default()
        };
        let template = template();

        let report = ClusterPass::new(&platform, &options, &template)
            .run(&cluster)
            .await
            .unwrap();

        // 4 assignments + 2 rules + 2 policies
        assert_eq!(report.passthru.len(), 8);
        let json = serde_json::to_string(&report.passthru[0]).unwrap();
        assert!(json.contains("\"kind\":\"tag_assignment\""));
    }

    #[tokio::test]
    async fn test_cluster_without_fault_domains_fails() {
        let platform = crate::platform::InMemoryPlatform::new();
        platform.seed_cluster("flat", None).unwrap();
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        let options = PassOptions::default();
        let template = template();

        let err = ClusterPass::new(&platform, &options, &template)
            .run(&cluster)
            .await
            .unwrap_err();
        assert!(matches!(err, StretchError::InvalidConfig(_)));
    }
}
