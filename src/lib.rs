//! stretchguard - desired-state configuration for stretched clusters
//!
//! For every fault domain of a stretched compute cluster, stretchguard makes
//! sure the following exist and match the desired state:
//!
//! - A tag in a shared tag category, attached to every host of the domain
//! - A VM-host affinity rule binding workloads and hosts carrying that tag
//! - A storage policy keeping objects in the domain with the chosen
//!   fault tolerance
//!
//! Missing resources are created. Existing resources that drifted are
//! reported as conflicts and never modified.

pub mod config;
pub mod error;
pub mod platform;
pub mod policy;
pub mod reconcile;
pub mod runner;

pub use error::{Result, StretchError};
