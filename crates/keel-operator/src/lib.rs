//! Keel operator: lifecycle controller for keel CRDs
//!
//! The lifecycle layer owns finalizer bookkeeping and status persistence;
//! domain reconcilers only converge their object and report back.

pub mod controlplane;
pub mod dataplane;
pub mod lifecycle;
pub mod runner;
pub mod store;
pub mod substrate;

pub use controlplane::ControlPlaneReconciler;
pub use dataplane::DataPlaneReconciler;
pub use lifecycle::{
    DomainReconciler, LifecycleController, LifecycleObject, ReconcileResult, WAITING_REQUEUE,
};
pub use store::{ClusterKubeStore, KubeStore, MemoryStore, ObjectStore};
pub use substrate::SubstrateReconciler;
