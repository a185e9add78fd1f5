//! Bosun Kubernetes layer
//!
//! A narrow capability surface over the Kubernetes API, scoped to the kinds
//! the engine actually touches, plus the synthesizer that turns validated
//! steps into bundles of manifests.
//!
//! The [`ClusterOps`] trait is the seam everything above this crate is
//! tested through: the real [`KubeCluster`] talks to a cluster, the engine
//! tests swap in an in-memory fake.

pub mod bundle;
mod client;
pub mod error;
mod object;
mod selector;

pub use client::{ClusterOps, KubeCluster, ObjectStream};
pub use error::{ClusterError, Result};
pub use object::{Kind, Object};
pub use selector::{Selector, APP_LABEL, STAGE_LABEL, STEP_LABEL, WORKFLOW_LABEL};
