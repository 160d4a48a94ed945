//! Control-plane certificate reconciler
//!
//! Waits for the cluster endpoint published by the fleet, then ensures
//! the control-plane certificate tree. Secrets are namespaced by the
//! substrate name.

use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;

use keel_common::crd::Substrate;
use keel_common::naming;
use keel_pki::{control_plane_tree, SecretOwner, TreeManager};

use super::{Outcome, Resource, Result, StatusDelta};

pub(crate) fn secret_owner(substrate: &Substrate) -> SecretOwner {
    SecretOwner {
        api_version: "keel.dev/v1alpha1".to_string(),
        kind: "Substrate".to_string(),
        name: substrate.name().to_string(),
        namespace: substrate.name().to_string(),
        uid: substrate.uid().unwrap_or_default(),
    }
}

pub struct Certificates {
    manager: Arc<TreeManager>,
}

impl Certificates {
    pub fn new(manager: Arc<TreeManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Resource for Certificates {
    fn name(&self) -> &'static str {
        "certificates"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let status = substrate.status.clone().unwrap_or_default();
        let Some(endpoint) = status.cluster.endpoint else {
            return Ok(Outcome::wait());
        };
        let name = substrate.name();
        let tree = control_plane_tree(name, &endpoint);
        self.manager
            .reconcile_tree(&secret_owner(substrate), &tree)
            .await?;
        Ok(Outcome::publish(StatusDelta::Certificates {
            ca_secret: naming::resource_name(name, &["ca"]),
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        // endpoint only shapes SANs, not secret names
        let tree = control_plane_tree(name, "");
        self.manager.delete_tree(name, &tree).await?;
        Ok(Outcome::done())
    }
}
