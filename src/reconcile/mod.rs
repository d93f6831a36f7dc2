//! Desired-state reconcilers
//!
//! Each reconciler looks up the current state of one resource kind, compares
//! it against the desired state and either creates the resource, leaves it
//! alone, or fails with a conflict. Nothing is ever updated or deleted.

pub mod affinity;
pub mod hosts;
pub mod labels;
pub mod storage;

pub use affinity::AffinityReconciler;
pub use hosts::{HostAssignment, HostLabelAssigner};
pub use labels::{DomainLabels, LabelReconciler, LabelReport};
pub use storage::StoragePolicyReconciler;

use crate::platform::{ComputePolicy, StoragePolicy};
use serde::Serialize;

/// What a reconciler did with one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The resource was absent and has been created
    Created,
    /// The resource already matched the desired state
    Compliant,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Compliant => write!(f, "compliant"),
        }
    }
}

/// A resource together with what happened to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciled<T> {
    pub outcome: Outcome,
    pub resource: T,
}

impl<T> Reconciled<T> {
    pub fn created(resource: T) -> Self {
        Self {
            outcome: Outcome::Created,
            resource,
        }
    }

    pub fn compliant(resource: T) -> Self {
        Self {
            outcome: Outcome::Compliant,
            resource,
        }
    }

    pub fn is_created(&self) -> bool {
        self.outcome == Outcome::Created
    }
}

/// Resource touched during a pass, emitted when pass-through is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Touched {
    TagAssignment {
        outcome: Outcome,
        #[serde(flatten)]
        assignment: HostAssignment,
    },
    AffinityRule {
        outcome: Outcome,
        #[serde(flatten)]
        policy: ComputePolicy,
    },
    StoragePolicy {
        outcome: Outcome,
        #[serde(flatten)]
        policy: StoragePolicy,
    },
}
