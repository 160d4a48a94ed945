//! Virtual network reconciler

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::Substrate;
use keel_common::Error;

use crate::cloud::Cloud;

use super::{Outcome, Resource, Result, StatusDelta};

pub struct NetworkResource {
    cloud: Arc<dyn Cloud>,
}

impl NetworkResource {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Resource for NetworkResource {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        let cidrs = &substrate.spec.network.cidrs;
        if cidrs.is_empty() {
            return Err(Error::validation("network requires at least one CIDR"));
        }
        if let Some(network) = self.cloud.find_network(name).await? {
            debug!(substrate = %name, network = %network.id, "found network");
            return Ok(Outcome::publish(StatusDelta::Network {
                network_id: network.id,
            }));
        }
        let network = self.cloud.create_network(name, cidrs).await?;
        info!(substrate = %name, network = %network.id, "created network");
        Ok(Outcome::publish(StatusDelta::Network {
            network_id: network.id,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        let Some(network) = self.cloud.find_network(name).await? else {
            return Ok(Outcome::done());
        };
        match self.cloud.delete_network(&network.id).await {
            Ok(()) => {
                info!(substrate = %name, network = %network.id, "deleted network");
                Ok(Outcome::done())
            }
            Err(e) if e.is_dependency_violation() => Ok(Outcome::wait()),
            Err(e) if e.is_not_found() => Ok(Outcome::done()),
            Err(e) => Err(e.into()),
        }
    }
}
