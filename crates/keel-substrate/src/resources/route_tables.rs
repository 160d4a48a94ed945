//! Public and private route table reconciler

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::Substrate;
use keel_common::naming;

use crate::cloud::{Cloud, RouteTable};

use super::{Outcome, Resource, Result, StatusDelta};

pub struct RouteTables {
    cloud: Arc<dyn Cloud>,
}

impl RouteTables {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }

    async fn ensure(
        &self,
        substrate: &str,
        name: &str,
        network_id: &str,
    ) -> Result<RouteTable> {
        if let Some(table) = self.cloud.find_route_table(substrate, name).await? {
            debug!(substrate = %substrate, table = %table.id, "found route table");
            return Ok(table);
        }
        let table = self
            .cloud
            .create_route_table(substrate, name, network_id)
            .await?;
        info!(substrate = %substrate, table = %table.id, name = %name, "created route table");
        Ok(table)
    }
}

#[async_trait]
impl Resource for RouteTables {
    fn name(&self) -> &'static str {
        "route-tables"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let status = substrate.status.clone().unwrap_or_default();
        let Some(network_id) = status.infrastructure.network_id else {
            return Ok(Outcome::wait());
        };
        let name = substrate.name();
        let public = self
            .ensure(name, &naming::resource_name(name, &["public"]), &network_id)
            .await?;
        let private = self
            .ensure(name, &naming::resource_name(name, &["private"]), &network_id)
            .await?;
        Ok(Outcome::publish(StatusDelta::RouteTables {
            public_route_table_id: public.id,
            private_route_table_id: private.id,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        for table in self.cloud.list_route_tables(name).await? {
            match self.cloud.delete_route_table(&table.id).await {
                Ok(()) => {
                    info!(substrate = %name, table = %table.id, "deleted route table");
                }
                Err(e) if e.is_dependency_violation() => return Ok(Outcome::wait()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Outcome::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloud;
    use keel_common::crd::{SubstrateSpec, SubstrateStatus};

    fn substrate_with_network() -> Substrate {
        let mut substrate = Substrate::named("alpha", SubstrateSpec::default());
        let mut status = SubstrateStatus::default();
        status.infrastructure.network_id = Some("net-1".to_string());
        substrate.status = Some(status);
        substrate
    }

    #[tokio::test]
    async fn create_waits_for_network() {
        let cloud = MockCloud::new();
        let substrate = Substrate::named("alpha", SubstrateSpec::default());
        let outcome = RouteTables::new(Arc::new(cloud))
            .create(&substrate)
            .await
            .unwrap();
        assert!(outcome.requeue.is_some());
        assert!(outcome.delta.is_none());
    }

    #[tokio::test]
    async fn create_publishes_both_tables() {
        let mut cloud = MockCloud::new();
        cloud.expect_find_route_table().returning(|_, _| Ok(None));
        cloud
            .expect_create_route_table()
            .returning(|_, name, _| {
                Ok(RouteTable {
                    id: format!("rtb-{}", name),
                    name: name.to_string(),
                })
            });

        let outcome = RouteTables::new(Arc::new(cloud))
            .create(&substrate_with_network())
            .await
            .unwrap();
        assert_eq!(
            outcome.delta,
            Some(StatusDelta::RouteTables {
                public_route_table_id: "rtb-alpha-public".to_string(),
                private_route_table_id: "rtb-alpha-private".to_string(),
            })
        );
    }
}
