//! Persistence for certificate material
//!
//! Generated cert/key pairs live in a [`SecretStore`]. The Kubernetes
//! implementation writes `kubernetes.io/tls` secrets owned by the object
//! that requested them, so they are garbage collected with it. The
//! in-memory and file-backed stores serve tests and local provisioning.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use keel_common::Error;

type Result<T> = std::result::Result<T, Error>;

/// Identity of the object a stored secret belongs to. Used both for
/// namespacing and for owner references in the Kubernetes store.
#[derive(Clone, Debug)]
pub struct SecretOwner {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

impl SecretOwner {
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Storage backend for certificate material.
///
/// `public` holds the PEM certificate (or rendered kubeconfig), `private`
/// the PEM key. Reads of absent secrets return `None`; deletes of absent
/// secrets succeed.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a stored pair, or None when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Create or overwrite a stored pair
    async fn put(
        &self,
        owner: &SecretOwner,
        name: &str,
        public: &[u8],
        private: &[u8],
    ) -> Result<()>;

    /// Remove a stored pair; absent is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Secrets stored as `kubernetes.io/tls` objects in the cluster
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => {
                let data = secret.data.unwrap_or_default();
                let public = data.get("tls.crt").map(|b| b.0.clone()).unwrap_or_default();
                let private = data.get("tls.key").map(|b| b.0.clone()).unwrap_or_default();
                Ok(Some((public, private)))
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        owner: &SecretOwner,
        name: &str,
        public: &[u8],
        private: &[u8],
    ) -> Result<()> {
        let mut data = BTreeMap::new();
        data.insert("tls.crt".to_string(), ByteString(public.to_vec()));
        data.insert("tls.key".to_string(), ByteString(private.to_vec()));

        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(owner.namespace.clone()),
                owner_references: Some(vec![owner.owner_reference()]),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(data),
            ..Default::default()
        };

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &owner.namespace);
        api.patch(
            name,
            &PatchParams::apply("keel").force(),
            &Patch::Apply(&secret),
        )
        .await?;
        debug!(namespace = %owner.namespace, secret = %name, "persisted secret");
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store keyed by namespace/name
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<(String, String), (Vec<u8>, Vec<u8>)>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pairs, across all namespaces
    pub fn len(&self) -> usize {
        self.secrets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a stored pair directly, bypassing ownership. Test hook
    /// for simulating corrupted material.
    pub fn inject(&self, namespace: &str, name: &str, public: &[u8], private: &[u8]) {
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (namespace.to_string(), name.to_string()),
                (public.to_vec(), private.to_vec()),
            );
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn put(
        &self,
        owner: &SecretOwner,
        name: &str,
        public: &[u8],
        private: &[u8],
    ) -> Result<()> {
        self.inject(&owner.namespace, name, public, private);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

/// Secrets stored as `<name>.crt` / `<name>.key` files under a directory
/// per namespace. Used for local provisioning where no cluster exists yet.
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn paths(&self, namespace: &str, name: &str) -> (PathBuf, PathBuf) {
        let dir = self.root.join(namespace);
        (
            dir.join(format!("{}.crt", name)),
            dir.join(format!("{}.key", name)),
        )
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let (crt, key) = self.paths(namespace, name);
        let public = match tokio::fs::read(&crt).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::pki(format!(
                    "failed to read {}: {}",
                    crt.display(),
                    e
                )))
            }
        };
        let private = match tokio::fs::read(&key).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(Error::pki(format!(
                    "failed to read {}: {}",
                    key.display(),
                    e
                )))
            }
        };
        Ok(Some((public, private)))
    }

    async fn put(
        &self,
        owner: &SecretOwner,
        name: &str,
        public: &[u8],
        private: &[u8],
    ) -> Result<()> {
        let (crt, key) = self.paths(&owner.namespace, name);
        let dir = self.root.join(&owner.namespace);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::pki(format!("failed to create {}: {}", dir.display(), e)))?;
        tokio::fs::write(&crt, public)
            .await
            .map_err(|e| Error::pki(format!("failed to write {}: {}", crt.display(), e)))?;
        tokio::fs::write(&key, private)
            .await
            .map_err(|e| Error::pki(format!("failed to write {}: {}", key.display(), e)))?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let (crt, key) = self.paths(namespace, name);
        for path in [crt, key] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::pki(format!(
                        "failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }
}
