//! Certificate tree reconciliation
//!
//! A [`CertTree`] declares a set of root CAs and the leaf certificates
//! each root signs. [`TreeManager::reconcile_tree`] walks the tree in
//! order, creating whatever is missing and leaving valid persisted
//! material untouched, so repeated runs converge without churn.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use keel_common::{naming, Error};

use crate::pki::{validate_keypair, CertificateAuthority, KeyUsage, LeafConfig};
use crate::store::{SecretOwner, SecretStore};

type Result<T> = std::result::Result<T, Error>;

/// A root CA to ensure
#[derive(Clone, Debug)]
pub struct RootRequest {
    /// Secret name the CA pair is stored under
    pub name: String,
    /// Subject common name of the CA certificate
    pub common_name: String,
}

/// A leaf certificate to ensure under a root
#[derive(Clone, Debug)]
pub struct LeafRequest {
    /// Secret name the pair is stored under
    pub name: String,
    pub config: LeafConfig,
}

/// Root CAs with the leaves each one signs. Roots are reconciled in
/// order, each root before its leaves.
#[derive(Clone, Debug, Default)]
pub struct CertTree {
    pub roots: Vec<(RootRequest, Vec<LeafRequest>)>,
}

/// Creates and persists certificate trees against a [`SecretStore`]
pub struct TreeManager {
    store: Arc<dyn SecretStore>,
}

impl TreeManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Ensure every root and leaf in the tree exists in the store.
    ///
    /// Existing valid material is reused as-is. Unparseable persisted
    /// material is regenerated in place. A signing failure aborts the
    /// walk without persisting the failed pair.
    pub async fn reconcile_tree(&self, owner: &SecretOwner, tree: &CertTree) -> Result<()> {
        for (root, leaves) in &tree.roots {
            let ca = self.ensure_root(owner, root).await?;
            for leaf in leaves {
                self.ensure_leaf(owner, &ca, leaf).await?;
            }
        }
        Ok(())
    }

    /// Delete every secret the tree would create. Absent secrets are
    /// skipped.
    pub async fn delete_tree(&self, namespace: &str, tree: &CertTree) -> Result<()> {
        for (root, leaves) in &tree.roots {
            for leaf in leaves {
                self.store.delete(namespace, &leaf.name).await?;
            }
            self.store.delete(namespace, &root.name).await?;
        }
        Ok(())
    }

    async fn ensure_root(
        &self,
        owner: &SecretOwner,
        root: &RootRequest,
    ) -> Result<CertificateAuthority> {
        if let Some((public, private)) = self.store.get(&owner.namespace, &root.name).await? {
            let cert_pem = String::from_utf8_lossy(&public);
            let key_pem = String::from_utf8_lossy(&private);
            match CertificateAuthority::from_pem(&cert_pem, &key_pem) {
                Ok(ca) => {
                    debug!(namespace = %owner.namespace, name = %root.name, "reusing existing CA");
                    return Ok(ca);
                }
                Err(e) => {
                    warn!(
                        namespace = %owner.namespace,
                        name = %root.name,
                        error = %e,
                        "stored CA material is unusable, regenerating"
                    );
                }
            }
        }

        let ca = CertificateAuthority::new(&root.common_name)?;
        self.store
            .put(
                owner,
                &root.name,
                ca.cert_pem().as_bytes(),
                ca.key_pem().as_bytes(),
            )
            .await?;
        info!(namespace = %owner.namespace, name = %root.name, "created root CA");
        Ok(ca)
    }

    async fn ensure_leaf(
        &self,
        owner: &SecretOwner,
        ca: &CertificateAuthority,
        leaf: &LeafRequest,
    ) -> Result<()> {
        if let Some((public, private)) = self.store.get(&owner.namespace, &leaf.name).await? {
            let cert_pem = String::from_utf8_lossy(&public);
            let key_pem = String::from_utf8_lossy(&private);
            if validate_keypair(&cert_pem, &key_pem).is_ok() {
                debug!(namespace = %owner.namespace, name = %leaf.name, "reusing existing certificate");
                return Ok(());
            }
            warn!(
                namespace = %owner.namespace,
                name = %leaf.name,
                "stored certificate material is unusable, regenerating"
            );
        }

        let (cert_pem, key_pem) = ca.issue(&leaf.config)?;
        self.store
            .put(owner, &leaf.name, cert_pem.as_bytes(), key_pem.as_bytes())
            .await?;
        info!(namespace = %owner.namespace, name = %leaf.name, "issued certificate");
        Ok(())
    }
}

/// The certificate tree for a cluster control plane: a cluster CA signing
/// the apiserver and its clients, and a front-proxy CA for aggregation.
pub fn control_plane_tree(cluster: &str, endpoint: &str) -> CertTree {
    let service_ip: IpAddr = IpAddr::from([10, 96, 0, 1]);
    let localhost: IpAddr = IpAddr::from([127, 0, 0, 1]);

    let mut apiserver_dns = vec![
        "localhost".to_string(),
        "kubernetes".to_string(),
        "kubernetes.default".to_string(),
        "kubernetes.default.svc".to_string(),
        "kubernetes.default.svc.cluster.local".to_string(),
    ];
    if !endpoint.is_empty() {
        apiserver_dns.push(endpoint.to_string());
    }

    CertTree {
        roots: vec![
            (
                RootRequest {
                    name: naming::resource_name(cluster, &["ca"]),
                    common_name: "kubernetes".to_string(),
                },
                vec![
                    LeafRequest {
                        name: naming::resource_name(cluster, &["apiserver"]),
                        config: LeafConfig {
                            common_name: "kube-apiserver".to_string(),
                            organization: None,
                            usages: vec![KeyUsage::ServerAuth],
                            dns_names: apiserver_dns,
                            ip_addresses: vec![localhost, service_ip],
                        },
                    },
                    LeafRequest {
                        name: naming::resource_name(cluster, &["apiserver", "kubelet", "client"]),
                        config: LeafConfig {
                            common_name: "kube-apiserver-kubelet-client".to_string(),
                            organization: Some("system:masters".to_string()),
                            usages: vec![KeyUsage::ClientAuth],
                            ..Default::default()
                        },
                    },
                    LeafRequest {
                        name: naming::resource_name(cluster, &["admin"]),
                        config: LeafConfig {
                            common_name: "kubernetes-admin".to_string(),
                            organization: Some("system:masters".to_string()),
                            usages: vec![KeyUsage::ClientAuth],
                            ..Default::default()
                        },
                    },
                ],
            ),
            (
                RootRequest {
                    name: naming::resource_name(cluster, &["front", "proxy", "ca"]),
                    common_name: "front-proxy-ca".to_string(),
                },
                vec![LeafRequest {
                    name: naming::resource_name(cluster, &["front", "proxy", "client"]),
                    config: LeafConfig {
                        common_name: "front-proxy-client".to_string(),
                        organization: None,
                        usages: vec![KeyUsage::ClientAuth],
                        ..Default::default()
                    },
                }],
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySecretStore;

    fn test_owner() -> SecretOwner {
        SecretOwner {
            api_version: "keel.dev/v1alpha1".to_string(),
            kind: "Substrate".to_string(),
            name: "alpha".to_string(),
            namespace: "alpha".to_string(),
            uid: "uid-1".to_string(),
        }
    }

    #[tokio::test]
    async fn reconcile_creates_every_secret() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = TreeManager::new(store.clone());
        let tree = control_plane_tree("alpha", "api.example.com");

        manager.reconcile_tree(&test_owner(), &tree).await.unwrap();

        for name in [
            "alpha-ca",
            "alpha-apiserver",
            "alpha-apiserver-kubelet-client",
            "alpha-admin",
            "alpha-front-proxy-ca",
            "alpha-front-proxy-client",
        ] {
            assert!(
                store.get("alpha", name).await.unwrap().is_some(),
                "missing secret {}",
                name
            );
        }
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_byte_for_byte() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = TreeManager::new(store.clone());
        let tree = control_plane_tree("alpha", "api.example.com");
        let owner = test_owner();

        manager.reconcile_tree(&owner, &tree).await.unwrap();
        let first = store.get("alpha", "alpha-apiserver").await.unwrap().unwrap();
        let first_ca = store.get("alpha", "alpha-ca").await.unwrap().unwrap();

        manager.reconcile_tree(&owner, &tree).await.unwrap();
        let second = store.get("alpha", "alpha-apiserver").await.unwrap().unwrap();
        let second_ca = store.get("alpha", "alpha-ca").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first_ca, second_ca);
    }

    #[tokio::test]
    async fn corrupt_leaf_is_regenerated() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = TreeManager::new(store.clone());
        let tree = control_plane_tree("alpha", "api.example.com");
        let owner = test_owner();

        manager.reconcile_tree(&owner, &tree).await.unwrap();
        store.inject("alpha", "alpha-admin", b"not a cert", b"not a key");

        manager.reconcile_tree(&owner, &tree).await.unwrap();
        let (public, private) = store.get("alpha", "alpha-admin").await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&public).contains("BEGIN CERTIFICATE"));
        assert!(String::from_utf8_lossy(&private).contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn corrupt_root_is_regenerated() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = TreeManager::new(store.clone());
        let tree = control_plane_tree("alpha", "api.example.com");
        let owner = test_owner();

        manager.reconcile_tree(&owner, &tree).await.unwrap();
        store.inject("alpha", "alpha-ca", b"garbage", b"garbage");

        manager.reconcile_tree(&owner, &tree).await.unwrap();
        let (public, _) = store.get("alpha", "alpha-ca").await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&public).contains("BEGIN CERTIFICATE"));
    }

    #[tokio::test]
    async fn delete_tree_removes_everything() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = TreeManager::new(store.clone());
        let tree = control_plane_tree("alpha", "api.example.com");

        manager.reconcile_tree(&test_owner(), &tree).await.unwrap();
        assert!(!store.is_empty());

        manager.delete_tree("alpha", &tree).await.unwrap();
        assert!(store.is_empty());

        // deleting an already-deleted tree is fine
        manager.delete_tree("alpha", &tree).await.unwrap();
    }
}
