//! Infrastructure resource reconcilers
//!
//! Each reconciler owns one cloud primitive and a matching
//! [`StatusDelta`] variant. It discovers before it creates, publishes
//! ids through its delta, and requeues while fields owned by other
//! reconcilers are still unset. Nothing here sleeps or retries; the
//! engine owns the pacing.

mod certificates;
mod fleet;
mod gateway;
mod identity;
mod kubeconfig;
mod network;
mod route_tables;
mod security_group;
mod subnets;

pub use certificates::Certificates;
pub use fleet::FleetResource;
pub use gateway::Gateways;
pub use identity::IdentityResource;
pub use kubeconfig::AdminKubeconfig;
pub use network::NetworkResource;
pub use route_tables::RouteTables;
pub use security_group::SecurityGroupResource;
pub use subnets::Subnets;

use async_trait::async_trait;
use std::time::Duration;

use keel_common::crd::Substrate;
use keel_common::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A typed status update. One variant per reconciler, so a reconciler
/// cannot write another's fields. Applied only by the engine
/// coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusDelta {
    Network {
        network_id: String,
    },
    RouteTables {
        public_route_table_id: String,
        private_route_table_id: String,
    },
    Subnets {
        public_subnet_ids: Vec<String>,
        private_subnet_ids: Vec<String>,
    },
    Gateways {
        internet_gateway_id: String,
        nat_gateway_id: String,
    },
    SecurityGroup {
        security_group_id: String,
    },
    Identity {
        role_id: String,
        instance_profile_id: String,
    },
    Fleet {
        fleet_id: String,
        instance_ids: Vec<String>,
        endpoint: String,
    },
    Certificates {
        ca_secret: String,
    },
    Kubeconfig {
        kubeconfig_secret: String,
    },
}

impl StatusDelta {
    /// Merge this delta into a substrate status
    pub fn apply(self, status: &mut keel_common::crd::SubstrateStatus) {
        match self {
            StatusDelta::Network { network_id } => {
                status.infrastructure.network_id = Some(network_id);
            }
            StatusDelta::RouteTables {
                public_route_table_id,
                private_route_table_id,
            } => {
                status.infrastructure.public_route_table_id = Some(public_route_table_id);
                status.infrastructure.private_route_table_id = Some(private_route_table_id);
            }
            StatusDelta::Subnets {
                public_subnet_ids,
                private_subnet_ids,
            } => {
                status.infrastructure.public_subnet_ids = public_subnet_ids;
                status.infrastructure.private_subnet_ids = private_subnet_ids;
            }
            StatusDelta::Gateways {
                internet_gateway_id,
                nat_gateway_id,
            } => {
                status.infrastructure.internet_gateway_id = Some(internet_gateway_id);
                status.infrastructure.nat_gateway_id = Some(nat_gateway_id);
            }
            StatusDelta::SecurityGroup { security_group_id } => {
                status.infrastructure.security_group_id = Some(security_group_id);
            }
            StatusDelta::Identity {
                role_id,
                instance_profile_id,
            } => {
                status.infrastructure.role_id = Some(role_id);
                status.infrastructure.instance_profile_id = Some(instance_profile_id);
            }
            StatusDelta::Fleet {
                fleet_id,
                instance_ids,
                endpoint,
            } => {
                status.infrastructure.fleet_id = Some(fleet_id);
                status.infrastructure.instance_ids = instance_ids;
                status.cluster.endpoint = Some(endpoint);
            }
            StatusDelta::Certificates { ca_secret } => {
                status.cluster.ca_secret = Some(ca_secret);
            }
            StatusDelta::Kubeconfig { kubeconfig_secret } => {
                status.cluster.kubeconfig_secret = Some(kubeconfig_secret);
            }
        }
    }
}

/// Result of one reconcile attempt
#[derive(Clone, Debug, Default)]
pub struct Outcome {
    /// Status fields to publish, if any
    pub delta: Option<StatusDelta>,
    /// When set, the attempt must run again after this long
    pub requeue: Option<Duration>,
}

impl Outcome {
    /// The resource has converged
    pub fn done() -> Self {
        Self::default()
    }

    /// Converged, with status fields to publish
    pub fn publish(delta: StatusDelta) -> Self {
        Self {
            delta: Some(delta),
            requeue: None,
        }
    }

    /// A precondition is unmet; retry as soon as the engine allows
    pub fn wait() -> Self {
        Self {
            delta: None,
            requeue: Some(Duration::ZERO),
        }
    }

    /// Retry after a specific delay
    pub fn retry_after(after: Duration) -> Self {
        Self {
            delta: None,
            requeue: Some(after),
        }
    }
}

/// One cloud primitive under reconciliation.
///
/// Both operations are idempotent against a status snapshot: `create`
/// discovers before creating and republishes the same delta when the
/// primitive already exists; `delete` of an absent primitive succeeds.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn create(&self, substrate: &Substrate) -> Result<Outcome>;
    async fn delete(&self, substrate: &Substrate) -> Result<Outcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::crd::SubstrateStatus;

    #[test]
    fn deltas_write_only_their_own_fields() {
        let mut status = SubstrateStatus::default();
        StatusDelta::Network {
            network_id: "net-1".to_string(),
        }
        .apply(&mut status);
        assert_eq!(status.infrastructure.network_id.as_deref(), Some("net-1"));
        assert!(status.infrastructure.public_route_table_id.is_none());
        assert!(status.cluster.endpoint.is_none());

        StatusDelta::Fleet {
            fleet_id: "fleet-1".to_string(),
            instance_ids: vec!["i-1".to_string()],
            endpoint: "api.example.com".to_string(),
        }
        .apply(&mut status);
        assert_eq!(status.infrastructure.network_id.as_deref(), Some("net-1"));
        assert_eq!(status.cluster.endpoint.as_deref(), Some("api.example.com"));
    }
}
