//! Compute fleet reconciler
//!
//! Launches the control-plane fleet once subnets, the security group and
//! the instance profile exist, and publishes the cluster endpoint that
//! the certificate and kubeconfig reconcilers wait on.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::Substrate;

use crate::cloud::{Cloud, FleetRequest};

use super::{Outcome, Resource, Result, StatusDelta};

const DEFAULT_INSTANCE_TYPE: &str = "t3.large";

pub struct FleetResource {
    cloud: Arc<dyn Cloud>,
}

impl FleetResource {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Resource for FleetResource {
    fn name(&self) -> &'static str {
        "fleet"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let status = substrate.status.clone().unwrap_or_default();
        let (Some(security_group_id), Some(instance_profile_id)) = (
            status.infrastructure.security_group_id,
            status.infrastructure.instance_profile_id,
        ) else {
            return Ok(Outcome::wait());
        };
        if status.infrastructure.private_subnet_ids.is_empty() {
            return Ok(Outcome::wait());
        }

        let name = substrate.name();
        if let Some(fleet) = self.cloud.find_fleet(name).await? {
            debug!(substrate = %name, fleet = %fleet.id, "found fleet");
            return Ok(Outcome::publish(StatusDelta::Fleet {
                fleet_id: fleet.id,
                instance_ids: fleet.instance_ids,
                endpoint: fleet.endpoint,
            }));
        }

        let request = FleetRequest {
            instance_type: substrate
                .spec
                .instance_type
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string()),
            subnet_ids: status.infrastructure.private_subnet_ids.clone(),
            security_group_id,
            instance_profile_id,
            count: None,
        };
        let fleet = self.cloud.create_fleet(name, &request).await?;
        info!(
            substrate = %name,
            fleet = %fleet.id,
            endpoint = %fleet.endpoint,
            instances = fleet.instance_ids.len(),
            "created fleet"
        );
        Ok(Outcome::publish(StatusDelta::Fleet {
            fleet_id: fleet.id,
            instance_ids: fleet.instance_ids,
            endpoint: fleet.endpoint,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        let Some(fleet) = self.cloud.find_fleet(name).await? else {
            return Ok(Outcome::done());
        };
        match self.cloud.delete_fleet(&fleet.id).await {
            Ok(()) => {
                info!(substrate = %name, fleet = %fleet.id, "deleted fleet");
                Ok(Outcome::done())
            }
            Err(e) if e.is_dependency_violation() => Ok(Outcome::wait()),
            Err(e) if e.is_not_found() => Ok(Outcome::done()),
            Err(e) => Err(e.into()),
        }
    }
}
