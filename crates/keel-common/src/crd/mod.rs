//! Custom Resource Definitions for keel
//!
//! Target objects: `Substrate` (the cloud environment a cluster runs on),
//! `ControlPlane` (a hosted Kubernetes control plane) and `DataPlane`
//! (the worker-node fleet joining it). Spec is written by the requester,
//! status exclusively by reconcilers.

mod control_plane;
mod data_plane;
mod substrate;
mod types;

pub use control_plane::{ControlPlane, ControlPlaneSpec, ControlPlaneStatus};
pub use data_plane::{DataPlane, DataPlaneSpec, DataPlaneStatus};
pub use substrate::{
    ClusterStatus, InfrastructureStatus, NetworkSpec, SubnetSpec, Substrate, SubstrateSpec,
    SubstrateStatus,
};
pub use types::{
    mark_false, mark_true, set_condition, Condition, ConditionStatus, Conditioned,
    ACTIVE_CONDITION,
};
