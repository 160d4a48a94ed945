//! Gateway reconciler
//!
//! Ensures the internet gateway with a default route on the public
//! table, and a NAT gateway in the first public subnet with a default
//! route on the private table.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::Substrate;

use crate::cloud::{Cloud, Gateway};

use super::{Outcome, Resource, Result, StatusDelta};

pub struct Gateways {
    cloud: Arc<dyn Cloud>,
}

impl Gateways {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }

    async fn route(&self, route_table_id: &str, gateway_id: &str) -> Result<()> {
        match self.cloud.attach_gateway_route(route_table_id, gateway_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_associated() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Resource for Gateways {
    fn name(&self) -> &'static str {
        "gateways"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let status = substrate.status.clone().unwrap_or_default();
        let (Some(network_id), Some(public_rt), Some(private_rt)) = (
            status.infrastructure.network_id,
            status.infrastructure.public_route_table_id,
            status.infrastructure.private_route_table_id,
        ) else {
            return Ok(Outcome::wait());
        };
        let Some(public_subnet) = status.infrastructure.public_subnet_ids.first() else {
            return Ok(Outcome::wait());
        };

        let name = substrate.name();
        let internet: Gateway = match self.cloud.find_gateway(name).await? {
            Some(gateway) => {
                debug!(substrate = %name, gateway = %gateway.id, "found internet gateway");
                gateway
            }
            None => {
                let gateway = self.cloud.create_gateway(name, &network_id).await?;
                info!(substrate = %name, gateway = %gateway.id, "created internet gateway");
                gateway
            }
        };
        self.route(&public_rt, &internet.id).await?;

        let nat: Gateway = match self.cloud.find_nat_gateway(name).await? {
            Some(gateway) => {
                debug!(substrate = %name, gateway = %gateway.id, "found nat gateway");
                gateway
            }
            None => {
                let gateway = self.cloud.create_nat_gateway(name, public_subnet).await?;
                info!(substrate = %name, gateway = %gateway.id, "created nat gateway");
                gateway
            }
        };
        self.route(&private_rt, &nat.id).await?;

        Ok(Outcome::publish(StatusDelta::Gateways {
            internet_gateway_id: internet.id,
            nat_gateway_id: nat.id,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        if let Some(nat) = self.cloud.find_nat_gateway(name).await? {
            match self.cloud.delete_nat_gateway(&nat.id).await {
                Ok(()) => info!(substrate = %name, gateway = %nat.id, "deleted nat gateway"),
                Err(e) if e.is_dependency_violation() => return Ok(Outcome::wait()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        if let Some(gateway) = self.cloud.find_gateway(name).await? {
            match self.cloud.delete_gateway(&gateway.id).await {
                Ok(()) => {
                    info!(substrate = %name, gateway = %gateway.id, "deleted internet gateway")
                }
                Err(e) if e.is_dependency_violation() => return Ok(Outcome::wait()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Outcome::done())
    }
}
