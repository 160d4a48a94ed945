//! Shared types for the keel provisioner.
//!
//! This crate holds the CRD definitions (Substrate, ControlPlane), the
//! status condition helpers, deterministic naming, and the error taxonomy
//! every other keel crate builds on.

pub mod crd;
pub mod error;
pub mod naming;

pub use error::Error;
