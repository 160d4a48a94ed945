//! Admin kubeconfig generation
//!
//! Renders a kubeconfig from the cluster CA and admin client certificate
//! and persists it alongside the other cluster secrets. The rendered
//! document is stored whole in the secret's public half.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use keel_common::{naming, Error};

use crate::store::{SecretOwner, SecretStore};

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    pub current_context: String,
    pub users: Vec<NamedUser>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    pub server: String,
    #[serde(rename = "certificate-authority-data")]
    pub certificate_authority_data: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Context {
    pub cluster: String,
    pub user: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: User,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "client-certificate-data")]
    pub client_certificate_data: String,
    #[serde(rename = "client-key-data")]
    pub client_key_data: String,
}

/// Render an admin kubeconfig YAML document for the given cluster.
pub fn render(
    cluster: &str,
    endpoint: &str,
    ca_cert_pem: &[u8],
    client_cert_pem: &[u8],
    client_key_pem: &[u8],
) -> Result<String> {
    let user_name = format!("{}-admin", cluster);
    let context_name = format!("{}@{}", user_name, cluster);
    let config = Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster.to_string(),
            cluster: Cluster {
                server: format!("https://{}:443", endpoint),
                certificate_authority_data: STANDARD.encode(ca_cert_pem),
            },
        }],
        contexts: vec![NamedContext {
            name: context_name.clone(),
            context: Context {
                cluster: cluster.to_string(),
                user: user_name.clone(),
            },
        }],
        current_context: context_name,
        users: vec![NamedUser {
            name: user_name,
            user: User {
                client_certificate_data: STANDARD.encode(client_cert_pem),
                client_key_data: STANDARD.encode(client_key_pem),
            },
        }],
    };
    serde_yaml::to_string(&config)
        .map_err(|e| Error::pki(format!("failed to render kubeconfig: {}", e)))
}

/// Ensure the admin kubeconfig secret exists for a cluster.
///
/// Reuses an existing secret unchanged. Requires the cluster CA and admin
/// certificate secrets to be present already; returns a waiting error
/// when they are not.
pub async fn ensure_admin_kubeconfig(
    store: &dyn SecretStore,
    owner: &SecretOwner,
    cluster: &str,
    endpoint: &str,
) -> Result<String> {
    let name = naming::resource_name(cluster, &["kubeconfig"]);
    if store.get(&owner.namespace, &name).await?.is_some() {
        debug!(namespace = %owner.namespace, secret = %name, "reusing existing kubeconfig");
        return Ok(name);
    }

    let ca_name = naming::resource_name(cluster, &["ca"]);
    let Some((ca_cert, _)) = store.get(&owner.namespace, &ca_name).await? else {
        return Err(Error::waiting(ca_name));
    };
    let admin_name = naming::resource_name(cluster, &["admin"]);
    let Some((admin_cert, admin_key)) = store.get(&owner.namespace, &admin_name).await? else {
        return Err(Error::waiting(admin_name));
    };

    let rendered = render(cluster, endpoint, &ca_cert, &admin_cert, &admin_key)?;
    store
        .put(owner, &name, rendered.as_bytes(), &[])
        .await?;
    info!(namespace = %owner.namespace, secret = %name, "created admin kubeconfig");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{CertificateAuthority, KeyUsage, LeafConfig};
    use crate::store::MemorySecretStore;
    use crate::tree::{control_plane_tree, TreeManager};
    use std::sync::Arc;

    fn test_owner() -> SecretOwner {
        SecretOwner {
            api_version: "keel.dev/v1alpha1".to_string(),
            kind: "Substrate".to_string(),
            name: "alpha".to_string(),
            namespace: "alpha".to_string(),
            uid: "uid-1".to_string(),
        }
    }

    #[test]
    fn render_produces_valid_yaml() {
        let ca = CertificateAuthority::new("kubernetes").unwrap();
        let (cert, key) = ca
            .issue(&LeafConfig {
                common_name: "kubernetes-admin".to_string(),
                organization: Some("system:masters".to_string()),
                usages: vec![KeyUsage::ClientAuth],
                ..Default::default()
            })
            .unwrap();

        let rendered = render(
            "alpha",
            "api.example.com",
            ca.cert_pem().as_bytes(),
            cert.as_bytes(),
            key.as_bytes(),
        )
        .unwrap();

        let parsed: Kubeconfig = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed.clusters[0].cluster.server, "https://api.example.com:443");
        assert_eq!(parsed.current_context, "alpha-admin@alpha");

        let decoded = STANDARD
            .decode(&parsed.users[0].user.client_certificate_data)
            .unwrap();
        assert!(String::from_utf8_lossy(&decoded).contains("BEGIN CERTIFICATE"));
    }

    #[tokio::test]
    async fn ensure_waits_for_certificates() {
        let store = MemorySecretStore::new();
        let err = ensure_admin_kubeconfig(&store, &test_owner(), "alpha", "api.example.com")
            .await
            .unwrap_err();
        assert!(err.is_waiting());
    }

    #[tokio::test]
    async fn ensure_creates_then_reuses() {
        let store = Arc::new(MemorySecretStore::new());
        let manager = TreeManager::new(store.clone());
        let owner = test_owner();
        manager
            .reconcile_tree(&owner, &control_plane_tree("alpha", "api.example.com"))
            .await
            .unwrap();

        let name = ensure_admin_kubeconfig(store.as_ref(), &owner, "alpha", "api.example.com")
            .await
            .unwrap();
        assert_eq!(name, "alpha-kubeconfig");
        let first = store.get("alpha", &name).await.unwrap().unwrap();

        ensure_admin_kubeconfig(store.as_ref(), &owner, "alpha", "api.example.com")
            .await
            .unwrap();
        let second = store.get("alpha", &name).await.unwrap().unwrap();
        assert_eq!(first, second);
    }
}
