//! Fault-domain labels
//!
//! One tag category holds one tag per fault domain. The resulting
//! [`DomainLabels`] map is the single source of truth for "the tag
//! representing domain D" for the rest of a cluster pass.

use super::{Outcome, Reconciled};
use crate::error::{Result, StretchError};
use crate::platform::{
    Cardinality, CategoryId, CategorySpec, FaultDomain, Platform, Tag, TagCategory, TagId,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Object types the category's tags may be attached to
pub const ASSOCIABLE_TYPES: &[&str] = &["HostSystem", "VirtualMachine"];

/// Fault-domain name -> tag, plus the category holding the tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainLabels {
    category: TagCategory,
    tags: BTreeMap<String, Tag>,
}

impl DomainLabels {
    pub fn category(&self) -> &TagCategory {
        &self.category
    }

    pub fn get(&self, domain: &str) -> Option<&Tag> {
        self.tags.get(domain)
    }

    /// Tag of a domain, failing if the domain was never labeled
    pub fn require(&self, domain: &str) -> Result<&Tag> {
        self.get(domain).ok_or_else(|| {
            StretchError::NotFound(format!(
                "label for fault domain {} in category {}",
                domain, self.category.name
            ))
        })
    }

    /// Domain a tag stands for, if it is one of ours
    pub fn domain_of(&self, tag: &TagId) -> Option<&str> {
        self.tags
            .iter()
            .find(|(_, t)| &t.id == tag)
            .map(|(domain, _)| domain.as_str())
    }

    /// Domains and their tags, ordered by domain name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tag)> {
        self.tags.iter().map(|(domain, tag)| (domain.as_str(), tag))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Result of ensuring the category and its labels
#[derive(Debug, Clone)]
pub struct LabelReport {
    pub labels: DomainLabels,
    pub category: Outcome,
    pub tags: Vec<Reconciled<Tag>>,
}

/// Ensures a category exists with one tag per fault domain
pub struct LabelReconciler<'a> {
    platform: &'a dyn Platform,
}

impl<'a> LabelReconciler<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Ensure `category_name` exists and holds a tag for every fault domain
    pub async fn ensure(
        &self,
        fault_domains: &[FaultDomain],
        category_name: &str,
    ) -> Result<LabelReport> {
        let found = self.platform.find_category(category_name).await?;
        let (category, category_outcome) = match found {
            Some(category) => {
                debug!("Found tag category {} ({})", category.name, category.id);
                (category, Outcome::Compliant)
            }
            None => self.create_category(category_name).await?,
        };

        let mut tags = BTreeMap::new();
        let mut reconciled = Vec::with_capacity(fault_domains.len());

        for domain in fault_domains {
            if tags.contains_key(&domain.name) {
                continue;
            }

            // A category we just created cannot hold any tags yet.
            let existing = if category_outcome == Outcome::Created {
                None
            } else {
                self.platform.find_tag(&category.id, &domain.name).await?
            };

            let entry = match existing {
                Some(tag) => {
                    debug!("Reusing tag {} ({})", tag.name, tag.id);
                    Reconciled::compliant(tag)
                }
                None => self.create_tag(&category.id, &domain.name).await?,
            };

            tags.insert(domain.name.clone(), entry.resource.clone());
            reconciled.push(entry);
        }

        Ok(LabelReport {
            labels: DomainLabels { category, tags },
            category: category_outcome,
            tags: reconciled,
        })
    }

    /// Create the category, or adopt it if another pass created it first
    async fn create_category(&self, name: &str) -> Result<(TagCategory, Outcome)> {
        let spec = CategorySpec {
            name: name.to_string(),
            description: "Fault domains of stretched clusters".to_string(),
            cardinality: Cardinality::Multiple,
            associable_types: ASSOCIABLE_TYPES.iter().map(|t| t.to_string()).collect(),
        };

        match self.platform.create_category(&spec).await {
            Ok(category) => {
                info!("Created tag category {}", category.name);
                Ok((category, Outcome::Created))
            }
            Err(StretchError::AlreadyExists(_)) => {
                let category = self.platform.find_category(name).await?.ok_or_else(|| {
                    StretchError::platform(
                        "create_category",
                        format!("category {} reported as existing but not found", name),
                    )
                })?;
                debug!("Category {} was created concurrently, adopting it", name);
                Ok((category, Outcome::Compliant))
            }
            Err(e) => Err(e),
        }
    }

    /// Create a tag, or adopt it if another pass created it first
    async fn create_tag(&self, category: &CategoryId, name: &str) -> Result<Reconciled<Tag>> {
        match self.platform.create_tag(category, name).await {
            Ok(tag) => {
                info!("Created tag {} ({})", tag.name, tag.id);
                Ok(Reconciled::created(tag))
            }
            Err(StretchError::AlreadyExists(_)) => {
                let tag = self.platform.find_tag(category, name).await?.ok_or_else(|| {
                    StretchError::platform(
                        "create_tag",
                        format!("tag {} reported as existing but not found", name),
                    )
                })?;
                debug!("Tag {} was created concurrently, adopting it", name);
                Ok(Reconciled::compliant(tag))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::two_domain_fixture;
    use crate::platform::Mutation;

    async fn domains(platform: &dyn Platform) -> Vec<FaultDomain> {
        let cluster = platform.list_clusters(None).await.unwrap().remove(0);
        platform.list_fault_domains(&cluster.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_fresh_category_gets_one_tag_per_domain() {
        let (platform, _) = two_domain_fixture();
        let fault_domains = domains(&platform).await;

        let report = LabelReconciler::new(&platform)
            .ensure(&fault_domains, "AZ")
            .await
            .unwrap();

        assert_eq!(report.category, Outcome::Created);
        assert_eq!(report.labels.len(), 2);
        assert!(report.tags.iter().all(|t| t.is_created()));
        assert_eq!(report.labels.require("DomainA").unwrap().name, "DomainA");
        assert_eq!(platform.tags_in("AZ").unwrap().len(), 2);
        assert_eq!(
            platform.journal().unwrap()[0],
            Mutation::CreateCategory {
                name: "AZ".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_existing_category_reuses_and_fills_gaps() {
        let (platform, _) = two_domain_fixture();
        let category = platform.seed_category("AZ").unwrap();
        let existing = platform.seed_tag(&category.id, "DomainA").unwrap();
        let fault_domains = domains(&platform).await;

        let report = LabelReconciler::new(&platform)
            .ensure(&fault_domains, "AZ")
            .await
            .unwrap();

        assert_eq!(report.category, Outcome::Compliant);
        assert_eq!(report.labels.get("DomainA"), Some(&existing));
        assert_eq!(report.labels.domain_of(&existing.id), Some("DomainA"));
        assert_eq!(
            report.tags.iter().filter(|t| t.is_created()).count(),
            1
        );
        assert_eq!(platform.tags_in("AZ").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_second_run_creates_nothing() {
        let (platform, _) = two_domain_fixture();
        let fault_domains = domains(&platform).await;
        let reconciler = LabelReconciler::new(&platform);

        let first = reconciler.ensure(&fault_domains, "AZ").await.unwrap();
        let before = platform.journal().unwrap().len();
        let second = reconciler.ensure(&fault_domains, "AZ").await.unwrap();

        assert_eq!(platform.journal().unwrap().len(), before);
        assert_eq!(first.labels, second.labels);
        assert!(second.tags.iter().all(|t| !t.is_created()));
    }

    #[tokio::test]
    async fn test_lost_creation_race_adopts_winner() {
        let (platform, _) = two_domain_fixture();
        platform.seed_category("AZ").unwrap();
        platform.lose_create_races(true).unwrap();
        let fault_domains = domains(&platform).await;

        let report = LabelReconciler::new(&platform)
            .ensure(&fault_domains, "AZ")
            .await
            .unwrap();

        assert_eq!(report.labels.len(), 2);
        assert_eq!(platform.tags_in("AZ").unwrap().len(), 2);
        assert!(platform.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates() {
        let (platform, _) = two_domain_fixture();
        platform.seed_category("AZ").unwrap();
        platform.fail_operation("find_tag").unwrap();
        let fault_domains = domains(&platform).await;

        let err = LabelReconciler::new(&platform)
            .ensure(&fault_domains, "AZ")
            .await
            .unwrap_err();
        assert!(matches!(err, StretchError::Platform { .. }));
    }
}
