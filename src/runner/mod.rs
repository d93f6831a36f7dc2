//! Drives cluster passes over every cluster matching a filter
//!
//! Clusters are reconciled independently: a failing cluster is reported and
//! the remaining clusters still run. Nothing is rolled back.

pub mod pass;

pub use pass::{ClusterPass, ClusterReport, PassOptions, DEFAULT_CATEGORY};

use crate::error::{Result, StretchError};
use crate::platform::{Cluster, Platform};
use crate::policy::{DesiredRuleSet, FaultTolerance};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Which clusters a run covers
#[derive(Debug, Clone)]
pub enum ClusterFilter {
    /// Every cluster (`*`)
    All,
    /// Exactly one cluster name
    Exact(String),
    /// Names matching a `*` wildcard pattern
    Pattern(Regex),
}

impl ClusterFilter {
    pub fn parse(filter: &str) -> Result<Self> {
        let filter = filter.trim();
        if filter.is_empty() || filter == "*" {
            return Ok(ClusterFilter::All);
        }
        if !filter.contains('*') {
            return Ok(ClusterFilter::Exact(filter.to_string()));
        }

        let pattern = filter
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", pattern))
            .map_err(|e| StretchError::InvalidConfig(format!("cluster filter {}: {}", filter, e)))?;
        Ok(ClusterFilter::Pattern(regex))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            ClusterFilter::All => true,
            ClusterFilter::Exact(exact) => exact == name,
            ClusterFilter::Pattern(regex) => regex.is_match(name),
        }
    }
}

/// Options for a whole run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// `*`, an exact cluster name, or a wildcard pattern
    pub cluster_filter: String,
    pub fault_tolerance: FaultTolerance,
    pub pass: PassOptions,
    /// Reconcile clusters concurrently
    pub parallel: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cluster_filter: "*".to_string(),
            fault_tolerance: FaultTolerance::Default,
            pass: PassOptions::default(),
            parallel: false,
        }
    }
}

/// Result of reconciling one cluster
#[derive(Debug)]
pub struct ClusterOutcome {
    pub cluster: Cluster,
    pub result: Result<ClusterReport>,
}

/// Results of a run, in cluster enumeration order
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ClusterOutcome>,
}

impl RunSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &ClusterReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&Cluster, &StretchError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.cluster, e)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Top-level runner
pub struct Runner {
    platform: Arc<dyn Platform>,
    options: RunOptions,
    filter: ClusterFilter,
    template: DesiredRuleSet,
}

impl Runner {
    /// Create a runner; the desired rule set is built once here
    pub fn new(platform: Arc<dyn Platform>, options: RunOptions) -> Result<Self> {
        let template = DesiredRuleSet::build(options.fault_tolerance)?;
        let filter = ClusterFilter::parse(&options.cluster_filter)?;

        Ok(Self {
            platform,
            options,
            filter,
            template,
        })
    }

    pub fn template(&self) -> &DesiredRuleSet {
        &self.template
    }

    /// Clusters the filter selects
    pub async fn resolve_clusters(&self) -> Result<Vec<Cluster>> {
        let clusters = match &self.filter {
            ClusterFilter::Exact(name) => {
                let clusters = self.platform.list_clusters(Some(name)).await?;
                if clusters.is_empty() {
                    return Err(StretchError::NotFound(format!("cluster {}", name)));
                }
                clusters
            }
            filter => self
                .platform
                .list_clusters(None)
                .await?
                .into_iter()
                .filter(|c| filter.matches(&c.name))
                .collect(),
        };

        if clusters.is_empty() {
            tracing::warn!("No cluster matches {}", self.options.cluster_filter);
        }
        Ok(clusters)
    }

    /// Reconcile every selected cluster
    pub async fn run(&self) -> Result<RunSummary> {
        let clusters = self.resolve_clusters().await?;
        tracing::info!(
            "Reconciling {} cluster(s) with category {}",
            clusters.len(),
            self.options.pass.category
        );

        let outcomes = if self.options.parallel {
            self.run_parallel(clusters).await
        } else {
            self.run_sequential(clusters).await
        };

        for outcome in &outcomes {
            if let Err(e) = &outcome.result {
                tracing::error!("Cluster {} failed: {}", outcome.cluster.name, e);
            }
        }

        Ok(RunSummary { outcomes })
    }

    async fn run_sequential(&self, clusters: Vec<Cluster>) -> Vec<ClusterOutcome> {
        let pass = ClusterPass::new(self.platform.as_ref(), &self.options.pass, &self.template);

        let mut outcomes = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let result = pass.run(&cluster).await;
            outcomes.push(ClusterOutcome { cluster, result });
        }
        outcomes
    }

    async fn run_parallel(&self, clusters: Vec<Cluster>) -> Vec<ClusterOutcome> {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for (index, cluster) in clusters.into_iter().enumerate() {
            let platform = Arc::clone(&self.platform);
            let options = self.options.pass.clone();
            let template = self.template.clone();
            let target = cluster.clone();

            let handle = tasks.spawn(async move {
                ClusterPass::new(platform.as_ref(), &options, &template)
                    .run(&target)
                    .await
            });
            pending.insert(handle.id(), (index, cluster));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (
                    e.id(),
                    Err(StretchError::Internal(format!("cluster pass task failed: {}", e))),
                ),
            };
            if let Some((index, cluster)) = pending.remove(&id) {
                outcomes.push((index, ClusterOutcome { cluster, result }));
            }
        }

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}
