//! ControlPlane domain reconciler
//!
//! Issues the control-plane certificate tree and the admin kubeconfig
//! for a hosted control plane. Waits (as a requeue, never a failure)
//! until an API server endpoint is available for the certificate SANs.

use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

use keel_common::crd::ControlPlane;
use keel_common::{naming, Error};
use keel_pki::{control_plane_tree, kubeconfig, SecretOwner, SecretStore, TreeManager};

use crate::lifecycle::{DomainReconciler, LifecycleObject, ReconcileResult};

impl LifecycleObject for ControlPlane {}

pub struct ControlPlaneReconciler {
    manager: Arc<TreeManager>,
    store: Arc<dyn SecretStore>,
}

impl ControlPlaneReconciler {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            manager: Arc::new(TreeManager::new(store.clone())),
            store,
        }
    }

    fn owner(control_plane: &ControlPlane) -> SecretOwner {
        SecretOwner {
            api_version: "keel.dev/v1alpha1".to_string(),
            kind: "ControlPlane".to_string(),
            name: control_plane.name_any(),
            namespace: control_plane
                .namespace()
                .unwrap_or_else(|| "default".to_string()),
            uid: control_plane.uid().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl DomainReconciler for ControlPlaneReconciler {
    type Object = ControlPlane;

    fn name(&self) -> &'static str {
        "control-plane"
    }

    async fn reconcile(
        &self,
        control_plane: &mut ControlPlane,
    ) -> Result<ReconcileResult, Error> {
        let Some(endpoint) = control_plane.spec.endpoint.clone() else {
            return Err(Error::waiting("api server endpoint"));
        };
        let name = control_plane.name_any();
        let owner = Self::owner(control_plane);

        let tree = control_plane_tree(&name, &endpoint);
        self.manager.reconcile_tree(&owner, &tree).await?;

        let secret = kubeconfig::ensure_admin_kubeconfig(
            self.store.as_ref(),
            &owner,
            &name,
            &endpoint,
        )
        .await?;

        let status = control_plane.status.get_or_insert_with(Default::default);
        status.endpoint = Some(endpoint);
        status.kubeconfig_secret = Some(secret);
        Ok(ReconcileResult::done())
    }

    async fn finalize(&self, control_plane: &mut ControlPlane) -> Result<(), Error> {
        let name = control_plane.name_any();
        let namespace = control_plane
            .namespace()
            .unwrap_or_else(|| "default".to_string());

        // endpoint only shapes SANs, not secret names
        let tree = control_plane_tree(&name, "");
        self.manager.delete_tree(&namespace, &tree).await?;
        self.store
            .delete(&namespace, &naming::resource_name(&name, &["kubeconfig"]))
            .await?;
        info!(namespace = %namespace, control_plane = %name, "removed control plane secrets");
        Ok(())
    }

    fn expired(&self, control_plane: &ControlPlane) -> bool {
        control_plane.ttl_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::crd::ControlPlaneSpec;
    use keel_pki::MemorySecretStore;

    fn control_plane(endpoint: Option<&str>) -> ControlPlane {
        let mut cp = ControlPlane::new(
            "demo",
            ControlPlaneSpec {
                endpoint: endpoint.map(String::from),
                ..Default::default()
            },
        );
        cp.metadata.namespace = Some("clusters".to_string());
        cp
    }

    #[tokio::test]
    async fn waits_for_endpoint() {
        let store = Arc::new(MemorySecretStore::new());
        let reconciler = ControlPlaneReconciler::new(store);
        let err = reconciler
            .reconcile(&mut control_plane(None))
            .await
            .unwrap_err();
        assert!(err.is_waiting());
    }

    #[tokio::test]
    async fn issues_certificates_and_kubeconfig() {
        let store = Arc::new(MemorySecretStore::new());
        let reconciler = ControlPlaneReconciler::new(store.clone());
        let mut cp = control_plane(Some("api.example.com"));

        reconciler.reconcile(&mut cp).await.unwrap();

        let status = cp.status.unwrap();
        assert_eq!(status.endpoint.as_deref(), Some("api.example.com"));
        assert_eq!(status.kubeconfig_secret.as_deref(), Some("demo-kubeconfig"));
        assert!(store.get("clusters", "demo-ca").await.unwrap().is_some());
        assert!(store
            .get("clusters", "demo-apiserver")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn finalize_removes_all_secrets() {
        let store = Arc::new(MemorySecretStore::new());
        let reconciler = ControlPlaneReconciler::new(store.clone());
        let mut cp = control_plane(Some("api.example.com"));

        reconciler.reconcile(&mut cp).await.unwrap();
        assert!(!store.is_empty());

        reconciler.finalize(&mut cp).await.unwrap();
        assert!(store.is_empty());
    }
}
