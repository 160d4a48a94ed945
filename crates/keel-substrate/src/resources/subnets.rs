//! Subnet reconciler
//!
//! Waits for the network and both route tables, then ensures one subnet
//! per spec entry, associated with the route table matching its
//! visibility.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::{SubnetSpec, Substrate};
use keel_common::naming;

use crate::cloud::{Cloud, Subnet};

use super::{Outcome, Resource, Result, StatusDelta};

pub struct Subnets {
    cloud: Arc<dyn Cloud>,
}

impl Subnets {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }

    async fn ensure(
        &self,
        substrate: &str,
        network_id: &str,
        route_table_id: &str,
        spec: &SubnetSpec,
    ) -> Result<Subnet> {
        let visibility = if spec.public { "public" } else { "private" };
        let name = naming::resource_name(substrate, &[&spec.zone, visibility]);
        let subnet = match self.cloud.find_subnet(substrate, &name).await? {
            Some(subnet) => {
                debug!(substrate = %substrate, subnet = %subnet.id, "found subnet");
                subnet
            }
            None => {
                let subnet = self
                    .cloud
                    .create_subnet(substrate, &name, network_id, &spec.zone, &spec.cidr, spec.public)
                    .await?;
                info!(substrate = %substrate, subnet = %subnet.id, name = %name, "created subnet");
                subnet
            }
        };
        match self
            .cloud
            .associate_route_table(route_table_id, &subnet.id)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_already_associated() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(subnet)
    }
}

#[async_trait]
impl Resource for Subnets {
    fn name(&self) -> &'static str {
        "subnets"
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

        let name = substrate.name();
        let mut public_subnet_ids = Vec::new();
        let mut private_subnet_ids = Vec::new();
        for spec in &substrate.spec.subnets {
            let route_table = if spec.public { &public_rt } else { &private_rt };
            let subnet = self.ensure(name, &network_id, route_table, spec).await?;
            if subnet.public {
                public_subnet_ids.push(subnet.id);
            } else {
                private_subnet_ids.push(subnet.id);
            }
        }
        Ok(Outcome::publish(StatusDelta::Subnets {
            public_subnet_ids,
            private_subnet_ids,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        for subnet in self.cloud.list_subnets(name).await? {
            match self.cloud.delete_subnet(&subnet.id).await {
                Ok(()) => info!(substrate = %name, subnet = %subnet.id, "deleted subnet"),
                Err(e) if e.is_dependency_violation() => return Ok(Outcome::wait()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Outcome::done())
    }
}
