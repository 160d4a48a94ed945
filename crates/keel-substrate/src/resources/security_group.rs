//! Security group reconciler

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::Substrate;

use crate::cloud::Cloud;

use super::{Outcome, Resource, Result, StatusDelta};

pub struct SecurityGroupResource {
    cloud: Arc<dyn Cloud>,
}

impl SecurityGroupResource {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Resource for SecurityGroupResource {
    fn name(&self) -> &'static str {
        "security-group"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let status = substrate.status.clone().unwrap_or_default();
        let Some(network_id) = status.infrastructure.network_id else {
            return Ok(Outcome::wait());
        };
        let name = substrate.name();
        if let Some(group) = self.cloud.find_security_group(name).await? {
            debug!(substrate = %name, group = %group.id, "found security group");
            return Ok(Outcome::publish(StatusDelta::SecurityGroup {
                security_group_id: group.id,
            }));
        }
        let group = self.cloud.create_security_group(name, &network_id).await?;
        info!(substrate = %name, group = %group.id, "created security group");
        Ok(Outcome::publish(StatusDelta::SecurityGroup {
            security_group_id: group.id,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        let Some(group) = self.cloud.find_security_group(name).await? else {
            return Ok(Outcome::done());
        };
        match self.cloud.delete_security_group(&group.id).await {
            Ok(()) => {
                info!(substrate = %name, group = %group.id, "deleted security group");
                Ok(Outcome::done())
            }
            Err(e) if e.is_dependency_violation() => Ok(Outcome::wait()),
            Err(e) if e.is_not_found() => Ok(Outcome::done()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MockCloud, SecurityGroup};
    use keel_common::crd::{SubstrateSpec, SubstrateStatus};

    #[tokio::test]
    async fn create_is_idempotent() {
        let mut cloud = MockCloud::new();
        cloud
            .expect_find_security_group()
            .returning(|_| Ok(Some(SecurityGroup { id: "sg-1".to_string() })));
        cloud.expect_create_security_group().never();

        let mut substrate = Substrate::named("alpha", SubstrateSpec::default());
        let mut status = SubstrateStatus::default();
        status.infrastructure.network_id = Some("net-1".to_string());
        substrate.status = Some(status);

        let outcome = SecurityGroupResource::new(Arc::new(cloud))
            .create(&substrate)
            .await
            .unwrap();
        assert_eq!(
            outcome.delta,
            Some(StatusDelta::SecurityGroup {
                security_group_id: "sg-1".to_string()
            })
        );
    }
}
