//! Object persistence behind the lifecycle controller
//!
//! The controller talks to the API server through [`ObjectStore`] so its
//! finalizer and status logic can be exercised against [`MemoryStore`],
//! which emulates the server's deletion semantics: a delete of an object
//! holding finalizers only marks it, and the object disappears when the
//! last finalizer is removed.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Mutex;

use keel_common::Error;

type Result<T> = std::result::Result<T, Error>;

/// Storage operations the lifecycle controller needs
#[async_trait]
pub trait ObjectStore<O>: Send + Sync {
    /// Fetch an object, or None when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<O>>;

    /// Replace the object's finalizer list
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()>;

    /// Merge-patch the object's status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()>;

    /// Request deletion of the object
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// API-server-backed store
pub struct KubeStore<O> {
    client: Client,
    _object: PhantomData<O>,
}

impl<O> KubeStore<O> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _object: PhantomData,
        }
    }
}

impl<O> KubeStore<O>
where
    O: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    fn api(&self, namespace: &str) -> Api<O> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<O> ObjectStore<O> for KubeStore<O>
where
    O: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<O>> {
        match self.api(namespace).get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()> {
        let patch = json!({"metadata": {"finalizers": finalizers}});
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()> {
        let patch = json!({"status": status});
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// API-server-backed store for cluster-scoped objects; the namespace
/// argument is ignored
pub struct ClusterKubeStore<O> {
    client: Client,
    _object: PhantomData<O>,
}

impl<O> ClusterKubeStore<O> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _object: PhantomData,
        }
    }
}

impl<O> ClusterKubeStore<O>
where
    O: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
{
    fn api(&self) -> Api<O> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl<O> ObjectStore<O> for ClusterKubeStore<O>
where
    O: Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, _namespace: &str, name: &str) -> Result<Option<O>> {
        match self.api().get(name).await {
            Ok(object) => Ok(Some(object)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_finalizers(
        &self,
        _namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()> {
        let patch = json!({"metadata": {"finalizers": finalizers}});
        self.api()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()> {
        let patch = json!({"status": status});
        self.api()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<()> {
        match self.api().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store with API-server deletion semantics
#[derive(Default)]
pub struct MemoryStore<O> {
    objects: Mutex<HashMap<(String, String), O>>,
}

impl<O> MemoryStore<O>
where
    O: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Put an object in the store under its metadata namespace/name
    pub fn insert(&self, object: O) {
        let namespace = object.meta().namespace.clone().unwrap_or_default();
        let name = object.meta().name.clone().unwrap_or_default();
        self.lock().insert((namespace, name), object);
    }

    /// Direct read, bypassing the trait
    pub fn get_cloned(&self, namespace: &str, name: &str) -> Option<O> {
        self.lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), O>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<O> ObjectStore<O> for MemoryStore<O>
where
    O: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<O>> {
        Ok(self.get_cloned(namespace, name))
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: &[String],
    ) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.lock();
        let Some(object) = objects.get_mut(&key) else {
            return Err(Error::waiting(format!("{}/{}", namespace, name)));
        };
        object.meta_mut().finalizers = if finalizers.is_empty() {
            None
        } else {
            Some(finalizers.to_vec())
        };
        // the server garbage-collects once a marked object loses its
        // last finalizer
        if finalizers.is_empty() && object.meta().deletion_timestamp.is_some() {
            objects.remove(&key);
        }
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &serde_json::Value,
    ) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.lock();
        let Some(object) = objects.get_mut(&key) else {
            return Err(Error::waiting(format!("{}/{}", namespace, name)));
        };
        let mut value = serde_json::to_value(&*object)?;
        value["status"] = status.clone();
        *object = serde_json::from_value(value)?;
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (namespace.to_string(), name.to_string());
        let mut objects = self.lock();
        let Some(object) = objects.get_mut(&key) else {
            return Ok(());
        };
        if object.meta().finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
            object.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
        } else {
            objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::crd::{ControlPlane, ControlPlaneSpec};

    fn control_plane(name: &str) -> ControlPlane {
        let mut cp = ControlPlane::new(name, ControlPlaneSpec::default());
        cp.metadata.namespace = Some("default".to_string());
        cp
    }

    #[tokio::test]
    async fn delete_with_finalizers_only_marks() {
        let store = MemoryStore::new();
        let mut cp = control_plane("demo");
        cp.metadata.finalizers = Some(vec!["keel.dev/control-plane".to_string()]);
        store.insert(cp);

        store.delete("default", "demo").await.unwrap();
        let marked = store.get_cloned("default", "demo").expect("still present");
        assert!(marked.metadata.deletion_timestamp.is_some());

        store.set_finalizers("default", "demo", &[]).await.unwrap();
        assert!(!store.contains("default", "demo"));
    }

    #[tokio::test]
    async fn delete_without_finalizers_removes() {
        let store = MemoryStore::new();
        store.insert(control_plane("demo"));
        store.delete("default", "demo").await.unwrap();
        assert!(!store.contains("default", "demo"));
    }

    #[tokio::test]
    async fn status_patch_round_trips() {
        let store = MemoryStore::new();
        store.insert(control_plane("demo"));
        store
            .patch_status(
                "default",
                "demo",
                &serde_json::json!({"endpoint": "api.example.com"}),
            )
            .await
            .unwrap();
        let cp = store.get_cloned("default", "demo").unwrap();
        assert_eq!(
            cp.status.unwrap().endpoint.as_deref(),
            Some("api.example.com")
        );
    }
}
