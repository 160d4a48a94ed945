//! DataPlane domain reconciler
//!
//! Launches the worker-node fleet for a cluster. Workers go into the
//! substrate's private subnets and reuse its security group and
//! instance profile, so reconciliation waits until the substrate has
//! published those identifiers.

use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

use keel_common::crd::{DataPlane, Substrate};
use keel_common::{naming, Error};
use keel_substrate::{Cloud, FleetRequest};

use crate::lifecycle::{DomainReconciler, LifecycleObject, ReconcileResult};
use crate::store::ObjectStore;

impl LifecycleObject for DataPlane {}

pub struct DataPlaneReconciler {
    cloud: Arc<dyn Cloud>,
    substrates: Arc<dyn ObjectStore<Substrate>>,
}

impl DataPlaneReconciler {
    pub fn new(cloud: Arc<dyn Cloud>, substrates: Arc<dyn ObjectStore<Substrate>>) -> Self {
        Self { cloud, substrates }
    }

    /// Owner tag for the worker fleet, distinct from the substrate's
    /// control plane fleet
    fn fleet_key(data_plane: &DataPlane) -> String {
        naming::resource_name(&data_plane.name_any(), &["nodes"])
    }
}

#[async_trait]
impl DomainReconciler for DataPlaneReconciler {
    type Object = DataPlane;

    fn name(&self) -> &'static str {
        "data-plane"
    }

    async fn reconcile(&self, data_plane: &mut DataPlane) -> Result<ReconcileResult, Error> {
        let cluster = data_plane.spec.cluster_name.clone();
        if cluster.is_empty() {
            return Err(Error::validation("spec.clusterName cannot be empty"));
        }

        let Some(substrate) = self.substrates.get("", &cluster).await? else {
            return Err(Error::waiting(format!("substrate {}", cluster)));
        };
        let infrastructure = substrate
            .status
            .map(|s| s.infrastructure)
            .unwrap_or_default();
        let (Some(security_group_id), Some(instance_profile_id)) = (
            infrastructure.security_group_id,
            infrastructure.instance_profile_id,
        ) else {
            return Err(Error::waiting(format!("substrate {} infrastructure", cluster)));
        };
        if infrastructure.private_subnet_ids.is_empty() {
            return Err(Error::waiting(format!("substrate {} subnets", cluster)));
        }

        let key = Self::fleet_key(data_plane);
        let fleet = match self.cloud.find_fleet(&key).await? {
            Some(fleet) => fleet,
            None => {
                let request = FleetRequest {
                    instance_type: data_plane.spec.instance_type().to_string(),
                    subnet_ids: infrastructure.private_subnet_ids,
                    security_group_id,
                    instance_profile_id,
                    count: Some(data_plane.spec.node_count as usize),
                };
                let fleet = self.cloud.create_fleet(&key, &request).await?;
                info!(
                    data_plane = %data_plane.name_any(),
                    cluster = %cluster,
                    fleet = %fleet.id,
                    nodes = fleet.instance_ids.len(),
                    "launched worker fleet"
                );
                fleet
            }
        };

        let status = data_plane.status.get_or_insert_with(Default::default);
        status.fleet_id = Some(fleet.id);
        status.instance_ids = fleet.instance_ids;
        Ok(ReconcileResult::done())
    }

    async fn finalize(&self, data_plane: &mut DataPlane) -> Result<(), Error> {
        let key = Self::fleet_key(data_plane);
        if let Some(fleet) = self.cloud.find_fleet(&key).await? {
            match self.cloud.delete_fleet(&fleet.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
            info!(data_plane = %data_plane.name_any(), fleet = %fleet.id, "worker fleet removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_common::crd::{DataPlaneSpec, NetworkSpec, SubnetSpec, SubstrateSpec};
    use keel_pki::MemorySecretStore;
    use keel_substrate::{Engine, LocalCloud};

    use crate::store::MemoryStore;

    fn data_plane(cluster: &str, nodes: u32) -> DataPlane {
        let mut dp = DataPlane::new(
            "workers",
            DataPlaneSpec {
                cluster_name: cluster.to_string(),
                node_count: nodes,
                ..Default::default()
            },
        );
        dp.metadata.namespace = Some("clusters".to_string());
        dp
    }

    fn substrate() -> Substrate {
        Substrate::named(
            "delta",
            SubstrateSpec {
                network: NetworkSpec {
                    cidrs: vec!["10.0.0.0/16".to_string()],
                },
                subnets: vec![
                    SubnetSpec {
                        zone: "us-west-2a".to_string(),
                        cidr: "10.0.1.0/24".to_string(),
                        public: false,
                    },
                    SubnetSpec {
                        zone: "us-west-2a".to_string(),
                        cidr: "10.0.100.0/24".to_string(),
                        public: true,
                    },
                ],
                ..Default::default()
            },
        )
    }

    async fn converged_harness() -> (DataPlaneReconciler, Arc<LocalCloud>) {
        let cloud = Arc::new(LocalCloud::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let engine = Engine::new(cloud.clone(), secrets);
        let converged = engine.converge(&substrate()).await.unwrap();

        let substrates = Arc::new(MemoryStore::new());
        substrates.insert(converged);
        (DataPlaneReconciler::new(cloud.clone(), substrates), cloud)
    }

    #[tokio::test]
    async fn waits_until_the_substrate_exists() {
        let cloud = Arc::new(LocalCloud::new());
        let substrates: Arc<MemoryStore<Substrate>> = Arc::new(MemoryStore::new());
        let reconciler = DataPlaneReconciler::new(cloud, substrates);

        let err = reconciler
            .reconcile(&mut data_plane("delta", 3))
            .await
            .unwrap_err();
        assert!(err.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn launches_the_requested_node_count() {
        let (reconciler, _cloud) = converged_harness().await;
        let mut dp = data_plane("delta", 3);

        reconciler.reconcile(&mut dp).await.unwrap();

        let status = dp.status.clone().unwrap();
        assert!(status.fleet_id.is_some());
        assert_eq!(status.instance_ids.len(), 3);

        // a second pass reuses the fleet rather than launching again
        reconciler.reconcile(&mut dp).await.unwrap();
        assert_eq!(dp.status.unwrap().instance_ids.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn finalize_removes_only_the_worker_fleet() {
        let (reconciler, cloud) = converged_harness().await;
        let mut dp = data_plane("delta", 2);

        reconciler.reconcile(&mut dp).await.unwrap();
        reconciler.finalize(&mut dp).await.unwrap();

        assert!(cloud.find_fleet("workers-nodes").await.unwrap().is_none());
        // the substrate's control plane fleet is untouched
        assert!(cloud.find_fleet("delta").await.unwrap().is_some());

        // finalizing again is a no-op
        reconciler.finalize(&mut dp).await.unwrap();
    }
}
