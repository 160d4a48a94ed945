//! Machine identity reconciler
//!
//! The role and instance profile have no infrastructure preconditions,
//! so this converges on the first attempt.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use keel_common::crd::Substrate;

use crate::cloud::Cloud;

use super::{Outcome, Resource, Result, StatusDelta};

pub struct IdentityResource {
    cloud: Arc<dyn Cloud>,
}

impl IdentityResource {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Resource for IdentityResource {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn create(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        if let Some(identity) = self.cloud.find_identity(name).await? {
            debug!(substrate = %name, role = %identity.role_id, "found identity");
            return Ok(Outcome::publish(StatusDelta::Identity {
                role_id: identity.role_id,
                instance_profile_id: identity.instance_profile_id,
            }));
        }
        let identity = self.cloud.create_identity(name).await?;
        info!(substrate = %name, role = %identity.role_id, "created identity");
        Ok(Outcome::publish(StatusDelta::Identity {
            role_id: identity.role_id,
            instance_profile_id: identity.instance_profile_id,
        }))
    }

    async fn delete(&self, substrate: &Substrate) -> Result<Outcome> {
        let name = substrate.name();
        if self.cloud.find_identity(name).await?.is_none() {
            return Ok(Outcome::done());
        }
        match self.cloud.delete_identity(name).await {
            Ok(()) => {
                info!(substrate = %name, "deleted identity");
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
    use crate::cloud::{Identity, MockCloud};
    use keel_common::crd::SubstrateSpec;

    #[tokio::test]
    async fn create_has_no_preconditions() {
        let mut cloud = MockCloud::new();
        cloud.expect_find_identity().returning(|_| Ok(None));
        cloud.expect_create_identity().returning(|_| {
            Ok(Identity {
                role_id: "role-1".to_string(),
                instance_profile_id: "profile-1".to_string(),
            })
        });

        let substrate = Substrate::named("alpha", SubstrateSpec::default());
        let outcome = IdentityResource::new(Arc::new(cloud))
            .create(&substrate)
            .await
            .unwrap();
        assert!(outcome.requeue.is_none());
        assert_eq!(
            outcome.delta,
            Some(StatusDelta::Identity {
                role_id: "role-1".to_string(),
                instance_profile_id: "profile-1".to_string(),
            })
        );
    }
}
