use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    init_tracing, key, product, test_config, wait_for_phase, wait_for_removal, wait_until,
    Harness, FINALIZER,
};
use anyhow::Result;
use reconciler::reconcile::recorder::{
    MESSAGE_AVAILABLE, MESSAGE_CREATE, MESSAGE_DELETE, MESSAGE_DELETED, MESSAGE_UNAVAILABLE,
    MESSAGE_UPDATE, REASON_EVENT, REASON_FAILURE, REASON_PHASE,
};
use reconciler::{ObjectCache, Phase, Severity};
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_object_becomes_available() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(2), vec![product("lamp", Phase::Unknown)]).await;

    wait_for_phase(&harness, "lamp", Phase::Available).await?;
    wait_until("available event", || {
        harness
            .recorder
            .contains(Severity::Normal, REASON_PHASE, MESSAGE_AVAILABLE)
    })
    .await?;

    let stored = harness.store.get(&key("lamp")).expect("object is stored");
    assert!(stored.status.current_status.last_update_time.is_some());
    assert!(stored.status.last_operation.last_update_time.is_some());
    assert!(stored.metadata.has_finalizer(FINALIZER));
    assert!(harness
        .recorder
        .contains(Severity::Normal, REASON_EVENT, MESSAGE_CREATE));
    assert_eq!(harness.domain.applies(), 1);
    assert_eq!(harness.num_requeues("lamp"), 0);
    assert_eq!(harness.store.status_writes(), 1);

    // The status write echoes back as an update of an available object and must not requeue.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.domain.applies(), 1);
    assert_eq!(harness.runner.telemetry().reconciled(), 1);

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn available_object_updates_are_suppressed() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(2), vec![product("desk", Phase::Available)]).await;
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;

    harness
        .store
        .modify(&key("desk"), |object| object.spec.price_cents += 250)
        .expect("object exists");
    sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.domain.applies(), 0);
    assert_eq!(harness.store.status_writes(), 0);
    assert!(!harness
        .recorder
        .contains(Severity::Normal, REASON_EVENT, MESSAGE_UPDATE));
    assert!(harness.runner.telemetry().snapshot().suppressed_notifications >= 2);

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spec_change_on_unsettled_object_is_reconciled() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(1), Vec::new()).await;
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;

    harness.store.create(product("chair", Phase::Unknown));
    wait_for_phase(&harness, "chair", Phase::Available).await?;
    assert!(harness
        .recorder
        .contains(Severity::Normal, REASON_EVENT, MESSAGE_CREATE));

    harness.store.modify(&key("chair"), |object| {
        object.spec.price_cents = 4_200;
        object.status.current_status.phase = Phase::Unknown;
    });
    wait_until("second reconcile", || harness.domain.applies() == 2).await?;
    wait_for_phase(&harness, "chair", Phase::Available).await?;
    assert!(harness
        .recorder
        .contains(Severity::Normal, REASON_EVENT, MESSAGE_UPDATE));

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deletion_releases_finalizer_and_removes_object() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(2), vec![product("sofa", Phase::Available)]).await;
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;

    assert!(harness.store.request_deletion(&key("sofa")));
    wait_for_removal(&harness, "sofa").await?;
    wait_until("deleted event", || {
        harness
            .recorder
            .contains(Severity::Normal, REASON_PHASE, MESSAGE_DELETED)
    })
    .await?;
    wait_until("cache eviction", || {
        harness.runner.cache().keys().is_empty()
    })
    .await?;

    assert_eq!(harness.domain.teardowns(), 1);
    assert_eq!(harness.domain.applies(), 0);
    assert!(harness
        .recorder
        .contains(Severity::Normal, REASON_EVENT, MESSAGE_DELETE));
    wait_until("key forgotten", || harness.num_requeues("sofa") == 0).await?;

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_teardown_keeps_finalizer_and_retries() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(1), vec![product("shelf", Phase::Available)]).await;
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;
    harness.domain.fail_teardown(true);

    assert!(harness.store.request_deletion(&key("shelf")));
    wait_until("repeated teardown attempts", || {
        harness.domain.teardowns() >= 3
    })
    .await?;

    let stored = harness.store.get(&key("shelf")).expect("object retained");
    assert!(stored.metadata.has_finalizer(FINALIZER));
    assert!(stored.deletion_requested());
    assert!(harness.num_requeues("shelf") >= 1);
    assert!(harness
        .recorder
        .contains(Severity::Warning, REASON_PHASE, MESSAGE_UNAVAILABLE));
    let failure_messages: Vec<_> = harness
        .recorder
        .events_for("shelf")
        .into_iter()
        .filter(|event| event.severity == Severity::Warning && event.reason == REASON_FAILURE)
        .map(|event| event.message)
        .collect();
    assert!(failure_messages
        .iter()
        .any(|message| message.contains("catalog still references shelf")));
    assert!(harness.runner.telemetry().reconcile_failures() >= 2);

    harness.domain.fail_teardown(false);
    wait_for_removal(&harness, "shelf").await?;
    wait_until("backoff reset", || harness.num_requeues("shelf") == 0).await?;

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_reconcile_does_not_stop_other_keys() -> Result<()> {
    init_tracing();
    let objects = vec![
        product("volatile", Phase::Unknown),
        product("steady", Phase::Unknown),
    ];
    let harness = Harness::start(test_config(1), Vec::new()).await;
    harness.domain.panic_on("volatile", true);
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;
    for object in objects {
        harness.store.create(object);
    }

    wait_for_phase(&harness, "steady", Phase::Available).await?;
    wait_until("panic retried", || harness.num_requeues("volatile") >= 2).await?;
    assert!(harness.runner.telemetry().panics() >= 2);
    assert_eq!(
        harness.store.get(&key("volatile")).map(|object| object.phase()),
        Some(Phase::Unknown)
    );

    harness.domain.panic_on("volatile", false);
    wait_for_phase(&harness, "volatile", Phase::Available).await?;
    wait_until("volatile forgotten", || {
        harness.num_requeues("volatile") == 0
    })
    .await?;

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_status_write_conflicts_then_converges() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(1), Vec::new()).await;
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;

    let store = Arc::clone(&harness.store);
    harness.domain.before_next_apply(move || {
        store.modify(&key("rug"), |object| object.spec.price_cents = 990);
    });
    harness.store.create(product("rug", Phase::Unknown));

    wait_for_phase(&harness, "rug", Phase::Available).await?;
    assert!(harness.domain.applies() >= 2);
    assert!(harness
        .recorder
        .events_for("rug")
        .iter()
        .any(|event| event.reason == REASON_FAILURE && event.message.contains("conflict")));
    let stored = harness.store.get(&key("rug")).expect("object is stored");
    assert_eq!(stored.spec.price_cents, 990);

    harness.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_outage_is_retried_until_it_recovers() -> Result<()> {
    init_tracing();
    let harness = Harness::start(test_config(2), Vec::new()).await;
    wait_until("cache sync", || harness.runner.cache().has_synced()).await?;
    harness.store.set_unavailable(Some("maintenance window"));

    harness.store.create(product("vase", Phase::Unknown));
    wait_until("failed attempts", || harness.num_requeues("vase") >= 2).await?;
    assert!(harness
        .recorder
        .events_for("vase")
        .iter()
        .any(|event| event.message.contains("maintenance window")));

    harness.store.set_unavailable(None);
    wait_for_phase(&harness, "vase", Phase::Available).await?;
    wait_until("vase forgotten", || harness.num_requeues("vase") == 0).await?;

    harness.stop().await
}
