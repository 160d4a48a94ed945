//! Parallel convergence engine
//!
//! Every resource runs in its own task for the whole run. Tasks read
//! status snapshots from a watch channel and send typed deltas to the
//! coordinator, which is the only writer: it merges each delta and
//! republishes the snapshot. A resource that cannot proceed requeues
//! itself; a resource that fails cancels the run, and the remaining
//! tasks stop at their next retry boundary.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use keel_common::crd::Substrate;
use keel_common::Error;
use keel_pki::{SecretStore, TreeManager};

use crate::cloud::Cloud;
use crate::resources::{
    AdminKubeconfig, Certificates, FleetResource, Gateways, IdentityResource, NetworkResource,
    Resource, RouteTables, SecurityGroupResource, StatusDelta, Subnets,
};

/// Floor applied to every requeue delay
pub const MIN_BACKOFF: Duration = Duration::from_secs(1);

pub struct Engine {
    resources: Vec<Arc<dyn Resource>>,
}

impl Engine {
    /// The full provisioning chain against a cloud provider and secret
    /// store
    pub fn new(cloud: Arc<dyn Cloud>, store: Arc<dyn SecretStore>) -> Self {
        let manager = Arc::new(TreeManager::new(store.clone()));
        Self::with_resources(vec![
            Arc::new(NetworkResource::new(cloud.clone())),
            Arc::new(RouteTables::new(cloud.clone())),
            Arc::new(Subnets::new(cloud.clone())),
            Arc::new(Gateways::new(cloud.clone())),
            Arc::new(SecurityGroupResource::new(cloud.clone())),
            Arc::new(IdentityResource::new(cloud.clone())),
            Arc::new(FleetResource::new(cloud)),
            Arc::new(Certificates::new(manager)),
            Arc::new(AdminKubeconfig::new(store)),
        ])
    }

    pub fn with_resources(resources: Vec<Arc<dyn Resource>>) -> Self {
        Self { resources }
    }

    /// Drive every resource to convergence and return the substrate with
    /// its final status. Whether this provisions or tears down is read
    /// once from the deletion marker.
    pub async fn converge(&self, substrate: &Substrate) -> Result<Substrate, Error> {
        substrate.spec.validate()?;
        let deleting = substrate.deleting();
        let mut current = substrate.clone();
        if current.status.is_none() {
            current.status = Some(Default::default());
        }

        let (snapshot_tx, snapshot_rx) = watch::channel(current.clone());
        let (delta_tx, mut delta_rx) = mpsc::channel::<StatusDelta>(self.resources.len().max(1));
        let cancel = CancellationToken::new();

        let mut tasks = JoinSet::new();
        for resource in &self.resources {
            tasks.spawn(run_resource(
                resource.clone(),
                deleting,
                snapshot_rx.clone(),
                delta_tx.clone(),
                cancel.clone(),
            ));
        }
        drop(delta_tx);
        drop(snapshot_rx);

        // Sole writer: merge deltas and republish until every sender is
        // done.
        while let Some(delta) = delta_rx.recv().await {
            debug!(substrate = %current.name(), ?delta, "merging status delta");
            if let Some(status) = current.status.as_mut() {
                delta.apply(status);
            }
            let _ = snapshot_tx.send(current.clone());
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(Error::provider(format!("resource task failed: {}", e))),
            }
        }
        if let Some(error) = Error::combine(errors) {
            return Err(error);
        }

        info!(
            substrate = %current.name(),
            deleting,
            resources = self.resources.len(),
            "substrate converged"
        );
        Ok(current)
    }
}

async fn run_resource(
    resource: Arc<dyn Resource>,
    deleting: bool,
    snapshots: watch::Receiver<Substrate>,
    deltas: mpsc::Sender<StatusDelta>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let snapshot = snapshots.borrow().clone();
        let attempt = if deleting {
            resource.delete(&snapshot).await
        } else {
            resource.create(&snapshot).await
        };
        let requeue = match attempt {
            Ok(outcome) => {
                if let Some(delta) = outcome.delta {
                    // coordinator gone means the run is already over
                    if deltas.send(delta).await.is_err() {
                        return Ok(());
                    }
                }
                match outcome.requeue {
                    Some(after) => after,
                    None => return Ok(()),
                }
            }
            Err(e) if e.is_waiting() => {
                debug!(resource = resource.name(), error = %e, "waiting");
                Duration::ZERO
            }
            Err(e) => {
                cancel.cancel();
                return Err(Error::for_resource(resource.name(), e));
            }
        };
        let delay = requeue.max(MIN_BACKOFF);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Outcome;
    use async_trait::async_trait;
    use keel_common::crd::{NetworkSpec, SubstrateSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn substrate() -> Substrate {
        Substrate::named(
            "alpha",
            SubstrateSpec {
                network: NetworkSpec {
                    cidrs: vec!["10.0.0.0/16".to_string()],
                },
                ..Default::default()
            },
        )
    }

    /// Publishes its delta once the network id is visible in a snapshot
    struct WaitsForNetwork {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Resource for WaitsForNetwork {
        fn name(&self) -> &'static str {
            "waits-for-network"
        }

        async fn create(&self, substrate: &Substrate) -> Result<Outcome, Error> {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            let status = substrate.status.clone().unwrap_or_default();
            if status.infrastructure.network_id.is_none() {
                return Ok(Outcome::wait());
            }
            Ok(Outcome::publish(StatusDelta::SecurityGroup {
                security_group_id: "sg-1".to_string(),
            }))
        }

        async fn delete(&self, _: &Substrate) -> Result<Outcome, Error> {
            Ok(Outcome::done())
        }
    }

    struct PublishesNetwork;

    #[async_trait]
    impl Resource for PublishesNetwork {
        fn name(&self) -> &'static str {
            "publishes-network"
        }

        async fn create(&self, _: &Substrate) -> Result<Outcome, Error> {
            Ok(Outcome::publish(StatusDelta::Network {
                network_id: "net-1".to_string(),
            }))
        }

        async fn delete(&self, _: &Substrate) -> Result<Outcome, Error> {
            Ok(Outcome::done())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Resource for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }

        async fn create(&self, _: &Substrate) -> Result<Outcome, Error> {
            Err(Error::provider("permanently rejected"))
        }

        async fn delete(&self, _: &Substrate) -> Result<Outcome, Error> {
            Err(Error::provider("permanently rejected"))
        }
    }

    struct NeverDone;

    #[async_trait]
    impl Resource for NeverDone {
        fn name(&self) -> &'static str {
            "never-done"
        }

        async fn create(&self, _: &Substrate) -> Result<Outcome, Error> {
            Ok(Outcome::wait())
        }

        async fn delete(&self, _: &Substrate) -> Result<Outcome, Error> {
            Ok(Outcome::wait())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dependent_resource_sees_republished_snapshot() {
        let waiter = Arc::new(WaitsForNetwork {
            attempts: AtomicUsize::new(0),
        });
        let engine =
            Engine::with_resources(vec![Arc::new(PublishesNetwork), waiter.clone()]);

        let converged = engine.converge(&substrate()).await.unwrap();
        let status = converged.status.unwrap();
        assert_eq!(status.infrastructure.network_id.as_deref(), Some("net-1"));
        assert_eq!(
            status.infrastructure.security_group_id.as_deref(),
            Some("sg-1")
        );
        assert!(waiter.attempts.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_cancels_waiting_resources() {
        let engine = Engine::with_resources(vec![
            Arc::new(AlwaysFails) as Arc<dyn Resource>,
            Arc::new(NeverDone),
        ]);

        let err = engine.converge(&substrate()).await.unwrap_err();
        assert!(err.to_string().contains("always-fails"));
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_are_aggregated() {
        let engine = Engine::with_resources(vec![
            Arc::new(AlwaysFails) as Arc<dyn Resource>,
            Arc::new(AlwaysFails),
        ]);

        let err = engine.converge(&substrate()).await.unwrap_err();
        assert!(err.to_string().contains("always-fails"));
    }

    #[tokio::test]
    async fn validation_fails_before_any_work() {
        let engine = Engine::with_resources(vec![Arc::new(AlwaysFails) as Arc<dyn Resource>]);
        let substrate = Substrate::named("alpha", SubstrateSpec::default());
        let err = engine.converge(&substrate).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
