//! Admin kubeconfig reconciler
//!
//! Renders the admin kubeconfig from the issued certificates and
//! publishes the secret name. Runs after the certificate reconciler by
//! construction: it retries while the CA or admin pair is absent.

use async_trait::async_trait;
use std::sync::Arc;

use keel_common::crd::Substrate;
use keel_common::naming;
use keel_pki::{kubeconfig, SecretStore};

use super::certificates::secret_owner;
use super::{Outcome, Resource, Result, StatusDelta};

pub struct AdminKubeconfig {
    store: Arc<dyn SecretStore>,
}

impl AdminKubeconfig {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Resource for AdminKubeconfig {
    fn name(&self) -> &'static str {
        "kubeconfig"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let status = substrate.status.clone().unwrap_or_default();
        let Some(endpoint) = status.cluster.endpoint else {
            return Ok(Outcome::wait());
        };
        let name = substrate.name();
        match kubeconfig::ensure_admin_kubeconfig(
            self.store.as_ref(),
            &secret_owner(substrate),
            name,
            &endpoint,
        )
        .await
        {
            Ok(secret) => Ok(Outcome::publish(StatusDelta::Kubeconfig {
                kubeconfig_secret: secret,
            })),
            // certificates not issued yet
            Err(e) if e.is_waiting() => Ok(Outcome::wait()),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        self.store
            .delete(name, &naming::resource_name(name, &["kubeconfig"]))
            .await?;
        Ok(Outcome::done())
    }
}
