use super::recorder::{
    EventReporter, MESSAGE_AVAILABLE, MESSAGE_DELETED, MESSAGE_UNAVAILABLE, REASON_FAILURE,
    REASON_PHASE,
};
use super::store::ResourceStore;
use super::strategy::{ReconcileError, ReconcileFuture, Reconciler};
use crate::resource::{Phase, Resource, ResourceSpec};
use anyhow::Result;
use chrono::Utc;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;

pub type DomainFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Object-specific work run on a private copy of the snapshot.
pub trait DomainLogic<S>: Send + Sync + 'static {
    /// Drives external dependencies toward the declared spec.
    fn apply<'a>(&'a self, object: &'a mut Resource<S>) -> DomainFuture<'a>;

    /// Releases whatever `apply` created, before the finalizer is removed.
    fn teardown<'a>(&'a self, object: &'a mut Resource<S>) -> DomainFuture<'a>;
}

/// Domain logic with nothing to do: every object is immediately available and every deletion
/// immediately releasable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDomain;

impl<S: Send + Sync + 'static> DomainLogic<S> for NoopDomain {
    fn apply<'a>(&'a self, _object: &'a mut Resource<S>) -> DomainFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    fn teardown<'a>(&'a self, _object: &'a mut Resource<S>) -> DomainFuture<'a> {
        Box::pin(async { Ok(()) })
    }
}

/// Reconciler implementing the finalizer-guarded lifecycle:
///
/// * no deletion requested: run [`DomainLogic::apply`], mark the object `Available`, persist the
///   status;
/// * deletion requested and finalizer present: run [`DomainLogic::teardown`], drop the finalizer,
///   persist the object;
/// * deletion requested without the finalizer: nothing left to do.
///
/// Failures emit warning events and are returned unchanged so the key is retried.
pub struct FinalizingReconciler<S, D> {
    store: Arc<dyn ResourceStore<S>>,
    domain: D,
    events: EventReporter,
    finalizer: String,
}

impl<S: ResourceSpec, D: DomainLogic<S>> FinalizingReconciler<S, D> {
    pub fn new(
        store: Arc<dyn ResourceStore<S>>,
        domain: D,
        events: EventReporter,
        finalizer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            domain,
            events,
            finalizer: finalizer.into(),
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    async fn reconcile_live(&self, snapshot: &Resource<S>) -> Result<(), ReconcileError> {
        let mut working = snapshot.clone();
        self.domain
            .apply(&mut working)
            .await
            .map_err(ReconcileError::Domain)?;

        working.status.current_status.phase = Phase::Available;
        working.stamp_update_time(Utc::now());
        let persisted = self.store.update_status(working).await?;

        tracing::info!(
            namespace = persisted.namespace(),
            name = persisted.name(),
            resource_version = %persisted.metadata.resource_version,
            "object reconciled to available"
        );
        self.events.normal(&persisted, REASON_PHASE, MESSAGE_AVAILABLE);
        Ok(())
    }

    async fn reconcile_deletion(&self, snapshot: &Resource<S>) -> Result<(), ReconcileError> {
        let mut working = snapshot.clone();
        self.domain
            .teardown(&mut working)
            .await
            .map_err(ReconcileError::Domain)?;

        working.metadata.remove_finalizer(&self.finalizer);
        working.stamp_update_time(Utc::now());
        let persisted = self.store.update(working).await?;

        tracing::info!(
            namespace = persisted.namespace(),
            name = persisted.name(),
            finalizer = %self.finalizer,
            "teardown complete; finalizer released"
        );
        self.events.normal(&persisted, REASON_PHASE, MESSAGE_DELETED);
        Ok(())
    }

    fn report_failure(&self, object: &Resource<S>, error: &ReconcileError) {
        tracing::warn!(
            namespace = object.namespace(),
            name = object.name(),
            deleting = object.deletion_requested(),
            error = %error,
            "reconcile failed"
        );
        self.events.warning(object, REASON_FAILURE, &error.to_string());
        self.events.warning(object, REASON_PHASE, MESSAGE_UNAVAILABLE);
    }
}

impl<S: ResourceSpec, D: DomainLogic<S>> Reconciler<S> for FinalizingReconciler<S, D> {
    fn reconcile(&self, object: Arc<Resource<S>>) -> ReconcileFuture<'_> {
        Box::pin(async move {
            let result = if object.deletion_requested() {
                if !object.metadata.has_finalizer(&self.finalizer) {
                    tracing::debug!(
                        namespace = object.namespace(),
                        name = object.name(),
                        "deletion pending without finalizer; nothing to clean up"
                    );
                    return Ok(());
                }
                self.reconcile_deletion(&object).await
            } else {
                self.reconcile_live(&object).await
            };

            if let Err(error) = &result {
                self.report_failure(&object, error);
            }
            result
        })
    }
}
