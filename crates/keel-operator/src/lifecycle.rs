//! Generic per-object lifecycle controller
//!
//! Wraps a domain reconciler with the bookkeeping every controller
//! needs: finalizer add/remove, the `Active` condition, status
//! persistence on success and failure, and TTL-driven teardown. The
//! finalizer is only added before the first reconcile and only removed
//! after finalization succeeds, so an object can never disappear with
//! unfinalized sub-resources.

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use keel_common::crd::{mark_false, mark_true, Conditioned, ACTIVE_CONDITION};
use keel_common::error::is_network_transient;
use keel_common::Error;

use crate::store::ObjectStore;

type Result<T> = std::result::Result<T, Error>;

/// Requeue used when a reconcile reports it is waiting on something
pub const WAITING_REQUEUE: Duration = Duration::from_secs(15);

/// What the domain reconciler asked for after a successful pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcileResult {
    /// Re-run after this long; None means converged
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

/// Objects the lifecycle controller can manage
pub trait LifecycleObject:
    Resource<DynamicType = ()>
    + Conditioned
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
    /// The status document to merge-patch after each pass
    fn status_json(&self) -> Result<serde_json::Value> {
        let value = serde_json::to_value(self)?;
        Ok(value.get("status").cloned().unwrap_or(serde_json::Value::Null))
    }
}

/// Domain logic for one object kind
#[async_trait]
pub trait DomainReconciler: Send + Sync {
    type Object: LifecycleObject;

    /// Controller name; also the suffix of its finalizer
    fn name(&self) -> &'static str;

    /// Drive the object toward its spec. May update the object's status
    /// fields; the lifecycle controller persists them.
    async fn reconcile(&self, object: &mut Self::Object) -> Result<ReconcileResult>;

    /// Tear down everything reconcile created
    async fn finalize(&self, object: &mut Self::Object) -> Result<()>;

    /// TTL hook; an expired object is finalized and deleted
    fn expired(&self, _object: &Self::Object) -> bool {
        false
    }
}

pub struct LifecycleController<R: DomainReconciler> {
    reconciler: Arc<R>,
    store: Arc<dyn ObjectStore<R::Object>>,
}

impl<R: DomainReconciler> LifecycleController<R> {
    pub fn new(reconciler: Arc<R>, store: Arc<dyn ObjectStore<R::Object>>) -> Self {
        Self { reconciler, store }
    }

    fn finalizer(&self) -> String {
        format!("keel.dev/{}", self.reconciler.name())
    }

    /// One reconcile pass for the named object
    pub async fn process(&self, namespace: &str, name: &str) -> Result<ReconcileResult> {
        let Some(mut object) = self.store.get(namespace, name).await? else {
            // already gone; nothing left to converge
            debug!(controller = self.reconciler.name(), namespace, name, "object not found");
            return Ok(ReconcileResult::done());
        };

        let deleting = object.meta().deletion_timestamp.is_some();
        let expired = !deleting && self.reconciler.expired(&object);
        if deleting || expired {
            return self.finalize(namespace, name, &mut object, expired).await;
        }
        self.reconcile(namespace, name, &mut object).await
    }

    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        object: &mut R::Object,
    ) -> Result<ReconcileResult> {
        let finalizer = self.finalizer();
        let finalizers = object.meta().finalizers.clone().unwrap_or_default();
        if !finalizers.contains(&finalizer) {
            let mut next = finalizers;
            next.push(finalizer);
            self.store.set_finalizers(namespace, name, &next).await?;
            object.meta_mut().finalizers = Some(next);
        }

        let attempt = self.reconciler.reconcile(object).await;
        match &attempt {
            Ok(_) => mark_true(object.conditions_mut(), ACTIVE_CONDITION),
            Err(e) => mark_false(object.conditions_mut(), ACTIVE_CONDITION, &e.to_string()),
        }
        // status reflects the pass either way
        self.store
            .patch_status(namespace, name, &object.status_json()?)
            .await?;

        match attempt {
            Ok(result) => Ok(result),
            // a refused or timed-out connection means the endpoint is
            // still coming up, not that reconciliation failed
            Err(e) if e.is_waiting() || is_network_transient(&e) => {
                debug!(
                    controller = self.reconciler.name(),
                    namespace, name, error = %e, "waiting"
                );
                Ok(ReconcileResult::requeue_after(WAITING_REQUEUE))
            }
            Err(e) => Err(e),
        }
    }

    async fn finalize(
        &self,
        namespace: &str,
        name: &str,
        object: &mut R::Object,
        expired: bool,
    ) -> Result<ReconcileResult> {
        if expired {
            warn!(
                controller = self.reconciler.name(),
                namespace, name, "ttl expired, tearing down"
            );
        }
        // an error here leaves the finalizer (and so the object) in place
        self.reconciler.finalize(object).await?;

        let finalizer = self.finalizer();
        let finalizers = object.meta().finalizers.clone().unwrap_or_default();
        if finalizers.contains(&finalizer) {
            let next: Vec<String> = finalizers.into_iter().filter(|f| f != &finalizer).collect();
            self.store.set_finalizers(namespace, name, &next).await?;
        }
        if expired {
            self.store.delete(namespace, name).await?;
        }
        info!(
            controller = self.reconciler.name(),
            namespace, name, "finalized"
        );
        Ok(ReconcileResult::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use keel_common::crd::{ControlPlane, ControlPlaneSpec};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubReconciler {
        fail: AtomicBool,
        wait: AtomicBool,
        fail_finalize: AtomicBool,
        expire: AtomicBool,
        reconciles: AtomicUsize,
        finalizes: AtomicUsize,
    }

    #[async_trait]
    impl DomainReconciler for StubReconciler {
        type Object = ControlPlane;

        fn name(&self) -> &'static str {
            "stub"
        }

        async fn reconcile(&self, object: &mut ControlPlane) -> Result<ReconcileResult> {
            self.reconciles.fetch_add(1, Ordering::Relaxed);
            if self.fail.load(Ordering::Relaxed) {
                return Err(Error::provider("boom"));
            }
            if self.wait.load(Ordering::Relaxed) {
                return Err(Error::waiting("endpoint"));
            }
            object.status.get_or_insert_with(Default::default).endpoint =
                Some("api.example.com".to_string());
            Ok(ReconcileResult::done())
        }

        async fn finalize(&self, _object: &mut ControlPlane) -> Result<()> {
            self.finalizes.fetch_add(1, Ordering::Relaxed);
            if self.fail_finalize.load(Ordering::Relaxed) {
                return Err(Error::provider("cannot tear down"));
            }
            Ok(())
        }

        fn expired(&self, _object: &ControlPlane) -> bool {
            self.expire.load(Ordering::Relaxed)
        }
    }

    fn setup() -> (
        Arc<StubReconciler>,
        Arc<MemoryStore<ControlPlane>>,
        LifecycleController<StubReconciler>,
    ) {
        let reconciler = Arc::new(StubReconciler::default());
        let store = Arc::new(MemoryStore::new());
        let controller = LifecycleController::new(reconciler.clone(), store.clone());
        (reconciler, store, controller)
    }

    fn control_plane(name: &str) -> ControlPlane {
        let mut cp = ControlPlane::new(name, ControlPlaneSpec::default());
        cp.metadata.namespace = Some("default".to_string());
        cp
    }

    #[tokio::test]
    async fn reconcile_adds_finalizer_once() {
        let (_, store, controller) = setup();
        store.insert(control_plane("demo"));

        controller.process("default", "demo").await.unwrap();
        controller.process("default", "demo").await.unwrap();

        let cp = store.get_cloned("default", "demo").unwrap();
        assert_eq!(
            cp.metadata.finalizers,
            Some(vec!["keel.dev/stub".to_string()])
        );
    }

    #[tokio::test]
    async fn status_is_persisted_on_success() {
        let (_, store, controller) = setup();
        store.insert(control_plane("demo"));

        controller.process("default", "demo").await.unwrap();
        let status = store.get_cloned("default", "demo").unwrap().status.unwrap();
        assert_eq!(status.endpoint.as_deref(), Some("api.example.com"));
        assert_eq!(status.conditions[0].type_, ACTIVE_CONDITION);
        assert_eq!(
            status.conditions[0].status,
            keel_common::crd::ConditionStatus::True
        );
    }

    #[tokio::test]
    async fn status_is_persisted_on_failure() {
        let (reconciler, store, controller) = setup();
        reconciler.fail.store(true, Ordering::Relaxed);
        store.insert(control_plane("demo"));

        let err = controller.process("default", "demo").await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        let status = store.get_cloned("default", "demo").unwrap().status.unwrap();
        assert_eq!(
            status.conditions[0].status,
            keel_common::crd::ConditionStatus::False
        );
        assert!(status.conditions[0].message.contains("boom"));
    }

    #[tokio::test]
    async fn waiting_is_a_requeue_not_a_failure() {
        let (reconciler, store, controller) = setup();
        reconciler.wait.store(true, Ordering::Relaxed);
        store.insert(control_plane("demo"));

        let result = controller.process("default", "demo").await.unwrap();
        assert_eq!(result.requeue_after, Some(WAITING_REQUEUE));
    }

    #[tokio::test]
    async fn missing_object_is_terminal() {
        let (reconciler, _, controller) = setup();
        let result = controller.process("default", "ghost").await.unwrap();
        assert_eq!(result, ReconcileResult::done());
        assert_eq!(reconciler.reconciles.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn deletion_finalizes_then_releases() {
        let (reconciler, store, controller) = setup();
        store.insert(control_plane("demo"));
        controller.process("default", "demo").await.unwrap();

        store.delete("default", "demo").await.unwrap();
        controller.process("default", "demo").await.unwrap();

        assert_eq!(reconciler.finalizes.load(Ordering::Relaxed), 1);
        // finalizer removal let the server garbage-collect
        assert!(!store.contains("default", "demo"));
    }

    #[tokio::test]
    async fn finalize_failure_keeps_the_object() {
        let (reconciler, store, controller) = setup();
        store.insert(control_plane("demo"));
        controller.process("default", "demo").await.unwrap();

        reconciler.fail_finalize.store(true, Ordering::Relaxed);
        store.delete("default", "demo").await.unwrap();
        controller.process("default", "demo").await.unwrap_err();

        let cp = store.get_cloned("default", "demo").expect("object kept");
        assert_eq!(
            cp.metadata.finalizers,
            Some(vec!["keel.dev/stub".to_string()])
        );
    }

    #[tokio::test]
    async fn ttl_expiry_finalizes_and_deletes() {
        let (reconciler, store, controller) = setup();
        store.insert(control_plane("demo"));
        controller.process("default", "demo").await.unwrap();

        reconciler.expire.store(true, Ordering::Relaxed);
        controller.process("default", "demo").await.unwrap();

        assert_eq!(reconciler.finalizes.load(Ordering::Relaxed), 1);
        assert!(!store.contains("default", "demo"));
    }
}
