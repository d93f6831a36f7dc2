//! Host labels

use super::labels::DomainLabels;
use super::Reconciled;
use crate::error::{ResourceKind, Result, StretchError};
use crate::platform::{Cluster, FaultDomain, Host, Platform, TagId};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// A host carrying the tag of its fault domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostAssignment {
    pub host: Host,
    pub domain: String,
    pub tag: TagId,
}

/// Ensures every host carries the tag of its own fault domain
pub struct HostLabelAssigner<'a> {
    platform: &'a dyn Platform,
}

impl<'a> HostLabelAssigner<'a> {
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Attach the domain tag to every host that lacks it.
    ///
    /// A host outside every fault domain, or already carrying another tag of
    /// the category, fails the pass.
    pub async fn ensure(
        &self,
        cluster: &Cluster,
        hosts: &[Host],
        fault_domains: &[FaultDomain],
        labels: &DomainLabels,
    ) -> Result<Vec<Reconciled<HostAssignment>>> {
        let domain_of: HashMap<_, _> = fault_domains
            .iter()
            .flat_map(|d| d.hosts.iter().map(move |h| (h, d.name.as_str())))
            .collect();
        let category = labels.category();

        let mut assignments = Vec::with_capacity(hosts.len());
        for host in hosts {
            let domain = *domain_of
                .get(&host.id)
                .ok_or_else(|| StretchError::UnplacedHost {
                    cluster: cluster.name.clone(),
                    host: host.name.clone(),
                })?;
            let tag = labels.require(domain)?;

            let attached = self
                .platform
                .list_attached_tags(&host.id, &category.id)
                .await?;

            let assignment = HostAssignment {
                host: host.clone(),
                domain: domain.to_string(),
                tag: tag.id.clone(),
            };

            if attached.contains(&tag.id) {
                debug!("Host {} already tagged {}", host.name, tag.name);
                assignments.push(Reconciled::compliant(assignment));
                continue;
            }

            if let Some(foreign) = attached.first() {
                return Err(StretchError::Conflict {
                    kind: ResourceKind::HostLabel,
                    resource: host.name.clone(),
                    field: category.name.clone(),
                    desired: tag.name.clone(),
                    configured: labels
                        .domain_of(foreign)
                        .map(str::to_string)
                        .unwrap_or_else(|| foreign.to_string()),
                });
            }

            self.platform.attach_tag(&tag.id, &host.id).await?;
            info!("Tagged host {} with {}:{}", host.name, category.name, tag.name);
            assignments.push(Reconciled::created(assignment));
        }

        Ok(assignments)
    }
}
