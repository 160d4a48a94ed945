//! Substrate provisioning: cloud abstraction, per-primitive resource
//! reconcilers and the parallel convergence engine that drives them.

pub mod cloud;
pub mod engine;
pub mod resources;

pub use cloud::{Cloud, CloudError, CloudErrorKind, Fleet, FleetRequest, LocalCloud};
pub use engine::{Engine, MIN_BACKOFF};
pub use resources::{Outcome, Resource, StatusDelta};
