//! Certificate authority trees for keel
//!
//! A cluster's PKI is a small tree: root CAs at the top, the leaf
//! certificates each root signs below it. This crate issues that tree
//! idempotently: persisted material is reused as long as it parses, and
//! regenerated (with a warning) when it does not.

pub mod kubeconfig;
pub mod pki;
pub mod store;
pub mod tree;

pub use pki::{CertificateAuthority, KeyUsage, LeafConfig, PkiError};
pub use store::{FileSecretStore, KubeSecretStore, MemorySecretStore, SecretOwner, SecretStore};
pub use tree::{control_plane_tree, CertTree, LeafRequest, RootRequest, TreeManager};
