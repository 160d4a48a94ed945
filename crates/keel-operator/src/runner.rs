//! kube runtime wiring for the keel controllers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, CustomResourceExt, ResourceExt};
use tracing::{error, info};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use keel_common::crd::{ControlPlane, DataPlane, Substrate};
use keel_common::Error;
use keel_pki::KubeSecretStore;
use keel_substrate::{Engine, LocalCloud};

use crate::controlplane::ControlPlaneReconciler;
use crate::dataplane::DataPlaneReconciler;
use crate::lifecycle::LifecycleController;
use crate::store::{ClusterKubeStore, KubeStore};
use crate::substrate::SubstrateReconciler;

/// Requeue after a converged pass, to re-verify the world periodically
const STEADY_REQUEUE: Duration = Duration::from_secs(300);

/// Requeue after a fatal reconcile error
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Cloud inventory location when `KEEL_STATE_FILE` is unset
const DEFAULT_STATE_FILE: &str = "/var/lib/keel/state.json";

pub struct Context {
    control_planes: LifecycleController<ControlPlaneReconciler>,
    substrates: LifecycleController<SubstrateReconciler>,
    data_planes: LifecycleController<DataPlaneReconciler>,
}

impl Context {
    pub fn new(client: Client) -> Result<Self, Error> {
        let secrets = Arc::new(KubeSecretStore::new(client.clone()));

        let control_planes = LifecycleController::new(
            Arc::new(ControlPlaneReconciler::new(secrets.clone())),
            Arc::new(KubeStore::new(client.clone())),
        );

        let cloud = Arc::new(LocalCloud::with_state_file(state_file())?);
        let substrate_store = Arc::new(ClusterKubeStore::new(client.clone()));
        let engine = Arc::new(Engine::new(cloud.clone(), secrets));
        let substrates = LifecycleController::new(
            Arc::new(SubstrateReconciler::new(engine)),
            substrate_store.clone(),
        );

        let data_planes = LifecycleController::new(
            Arc::new(DataPlaneReconciler::new(cloud, substrate_store)),
            Arc::new(KubeStore::new(client)),
        );

        Ok(Self {
            control_planes,
            substrates,
            data_planes,
        })
    }
}

fn state_file() -> PathBuf {
    std::env::var_os("KEEL_STATE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

async fn reconcile_control_plane(
    control_plane: Arc<ControlPlane>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let namespace = control_plane
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let name = control_plane.name_any();
    let result = ctx.control_planes.process(&namespace, &name).await?;
    Ok(Action::requeue(result.requeue_after.unwrap_or(STEADY_REQUEUE)))
}

async fn reconcile_substrate(
    substrate: Arc<Substrate>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = substrate.name_any();
    let result = ctx.substrates.process("", &name).await?;
    Ok(Action::requeue(result.requeue_after.unwrap_or(STEADY_REQUEUE)))
}

async fn reconcile_data_plane(
    data_plane: Arc<DataPlane>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let namespace = data_plane
        .namespace()
        .unwrap_or_else(|| "default".to_string());
    let name = data_plane.name_any();
    let result = ctx.data_planes.process(&namespace, &name).await?;
    Ok(Action::requeue(result.requeue_after.unwrap_or(STEADY_REQUEUE)))
}

fn error_policy<K: ResourceExt>(object: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(object = %object.name_any(), %error, "reconciliation failed");
    Action::requeue(ERROR_REQUEUE)
}

/// Install (or update) the keel CRDs
pub async fn ensure_crds(client: Client) -> Result<(), Error> {
    let api: Api<CustomResourceDefinition> = Api::all(client);
    for crd in [Substrate::crd(), ControlPlane::crd(), DataPlane::crd()] {
        let name = crd.name_any();
        api.patch(
            &name,
            &PatchParams::apply("keel-operator").force(),
            &Patch::Apply(&crd),
        )
        .await?;
        info!(crd = %name, "installed CRD");
    }
    Ok(())
}

/// Run the controllers until shutdown
pub async fn run(client: Client) -> Result<(), Error> {
    let ctx = Arc::new(Context::new(client.clone())?);

    let control_planes: Api<ControlPlane> = Api::all(client.clone());
    let control_plane_driver = Controller::new(control_planes, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_control_plane, error_policy, ctx.clone())
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => info!(object = %object.name, "reconciled control plane"),
                Err(e) => error!(error = %e, "control plane stream error"),
            }
        });

    let substrates: Api<Substrate> = Api::all(client.clone());
    let substrate_driver = Controller::new(substrates, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_substrate, error_policy, ctx.clone())
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => info!(object = %object.name, "reconciled substrate"),
                Err(e) => error!(error = %e, "substrate stream error"),
            }
        });

    let data_planes: Api<DataPlane> = Api::all(client);
    let data_plane_driver = Controller::new(data_planes, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile_data_plane, error_policy, ctx)
        .for_each(|outcome| async move {
            match outcome {
                Ok((object, _)) => info!(object = %object.name, "reconciled data plane"),
                Err(e) => error!(error = %e, "data plane stream error"),
            }
        });

    info!("starting controllers");
    tokio::join!(control_plane_driver, substrate_driver, data_plane_driver);
    Ok(())
}
