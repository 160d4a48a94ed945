//! Substrate domain reconciler
//!
//! Thin adapter over the convergence engine: one reconcile pass drives
//! every infrastructure resource to its goal state and copies the
//! resulting status back onto the object. The engine retries waiting
//! resources internally, so only fatal errors surface here.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use keel_common::crd::Substrate;
use keel_common::Error;
use keel_substrate::Engine;

use crate::lifecycle::{DomainReconciler, LifecycleObject, ReconcileResult};

impl LifecycleObject for Substrate {}

pub struct SubstrateReconciler {
    engine: Arc<Engine>,
}

impl SubstrateReconciler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl DomainReconciler for SubstrateReconciler {
    type Object = Substrate;

    fn name(&self) -> &'static str {
        "substrate"
    }

    async fn reconcile(&self, substrate: &mut Substrate) -> Result<ReconcileResult, Error> {
        let converged = self.engine.converge(substrate).await?;
        substrate.status = converged.status;
        Ok(ReconcileResult::done())
    }

    async fn finalize(&self, substrate: &mut Substrate) -> Result<(), Error> {
        let mut doomed = substrate.clone();
        doomed.mark_deleted();
        self.engine.converge(&doomed).await?;
        info!(substrate = %substrate.name(), "infrastructure torn down");
        Ok(())
    }
}
