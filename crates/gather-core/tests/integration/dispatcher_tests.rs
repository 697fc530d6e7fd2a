use std::time::Duration;

use gather_core::testutil::{FailingCache, Gate, MockExtractor};
use gather_core::{AppError, DispatcherConfig, JobKind};
use serde_json::json;

use crate::integration::common::{
    HeldMissCache, gated_extractor, start_dispatcher, start_with_store, wait_in_flight,
    wait_queue_depth,
};

const CLINIC: &str = "https://www.google.com/maps/place/Clinic";

// ============================================================================
// Single-flight
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_identical_requests_execute_once() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(DispatcherConfig::default(), extractor.clone());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let d = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            d.submit(JobKind::Google, CLINIC).await
        }));
    }

    gate.wait_entered(1).await;
    // Let every caller reach the registry before the flight is released.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dispatcher.health().in_flight, 1);
    gate.open();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), json!({ "resource": CLINIC }));
    }
    assert_eq!(extractor.calls(), 1);
    assert_eq!(dispatcher.health().in_flight, 0);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn urls_with_same_org_id_share_one_execution() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(DispatcherConfig::default(), extractor.clone());

    let first_url = "https://yandex.ru/maps/org/abc/42";
    let d = dispatcher.clone();
    let first = tokio::spawn(async move { d.submit(JobKind::Yandex, first_url).await });
    gate.wait_entered(1).await;

    let d = dispatcher.clone();
    let second = tokio::spawn(async move {
        d.submit(JobKind::Yandex, "https://yandex.ru/maps/org/abc/42?utm=1")
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.open();

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first, json!({ "resource": first_url }));
    assert_eq!(extractor.calls(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_missing_cache_just_before_publish_does_not_extract_again() {
    let url = "https://yandex.ru/maps/org/a/42";
    let (extractor, gate) = gated_extractor();
    // Reads: #1 first caller, #2 its worker, #3 the late caller (held).
    let store = HeldMissCache::new(3);
    let dispatcher =
        start_with_store(DispatcherConfig::default(), store.clone(), extractor.clone());

    let d = dispatcher.clone();
    let first = tokio::spawn(async move { d.submit(JobKind::Yandex, url).await });
    gate.wait_entered(1).await;

    let d = dispatcher.clone();
    let late = tokio::spawn(async move { d.submit(JobKind::Yandex, url).await });
    store.wait_held().await;

    // The first flight publishes and leaves the registry while the late
    // caller still holds its miss.
    gate.open();
    assert!(first.await.unwrap().is_ok());
    wait_in_flight(&dispatcher, 0).await;
    store.release();

    assert_eq!(late.await.unwrap().unwrap(), json!({ "resource": url }));
    assert_eq!(extractor.calls(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn distinct_keys_run_up_to_pool_size() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(
        DispatcherConfig::default().with_workers(3),
        extractor.clone(),
    );

    let mut tasks = Vec::new();
    for id in 0..5 {
        let d = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            d.submit(JobKind::Gis, &format!("https://2gis.ru/moscow/firm/{id}"))
                .await
        }));
    }

    gate.wait_entered(3).await;
    wait_queue_depth(&dispatcher, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gate.entered(), 3);
    let health = dispatcher.health();
    assert_eq!(health.running, 3);
    assert_eq!(health.in_flight, 5);

    gate.open();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(extractor.calls(), 5);
    dispatcher.shutdown().await;
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cached_result_short_circuits() {
    let extractor = MockExtractor::new(json!({"name": "Cafe", "rating": 4.8}));
    let dispatcher = start_dispatcher(DispatcherConfig::default(), extractor.clone());

    let url = "https://2gis.ru/moscow/firm/70000001";
    let first = dispatcher.submit(JobKind::Gis, url).await.unwrap();
    let second = dispatcher
        .submit(JobKind::Gis, "https://2gis.ru/spb/firm/70000001/tab/reviews")
        .await
        .unwrap();

    assert_eq!(first, json!({"name": "Cafe", "rating": 4.8}));
    assert_eq!(first, second);
    assert_eq!(extractor.calls(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_entry_is_extracted_again() {
    let extractor = MockExtractor::with_responses(vec![
        Ok(json!({"rating": 4.1})),
        Ok(json!({"rating": 4.3})),
    ]);
    let dispatcher = start_dispatcher(
        DispatcherConfig::default().with_cache_ttl(Duration::from_millis(100)),
        extractor.clone(),
    );

    let first = dispatcher.submit(JobKind::Doctors, CLINIC).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    let second = dispatcher.submit(JobKind::Doctors, CLINIC).await.unwrap();

    assert_eq!(first, json!({"rating": 4.1}));
    assert_eq!(second, json!({"rating": 4.3}));
    assert_eq!(extractor.calls(), 2);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_cache_still_serves_requests() {
    let extractor = MockExtractor::with_responses(Vec::new());
    let store = FailingCache::new();
    let dispatcher = start_with_store(DispatcherConfig::default(), store.clone(), extractor.clone());

    assert!(dispatcher.submit(JobKind::Google, CLINIC).await.is_ok());
    assert!(dispatcher.submit(JobKind::Google, CLINIC).await.is_ok());

    // Nothing could be cached, so both requests ran.
    assert_eq!(extractor.calls(), 2);
    // Per request: dispatcher read, worker read, write.
    assert_eq!(store.attempts(), 6);
    dispatcher.shutdown().await;
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_queue_rejects_immediately() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(
        DispatcherConfig::default()
            .with_workers(1)
            .with_queue_capacity(2),
        extractor.clone(),
    );

    let mut tasks = Vec::new();
    let d = dispatcher.clone();
    tasks.push(tokio::spawn(async move {
        d.submit(JobKind::Gis, "https://2gis.ru/firm/1").await
    }));
    gate.wait_entered(1).await;

    for id in 2..4 {
        let d = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            d.submit(JobKind::Gis, &format!("https://2gis.ru/firm/{id}"))
                .await
        }));
    }
    wait_queue_depth(&dispatcher, 2).await;

    let rejected = tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.submit(JobKind::Gis, "https://2gis.ru/firm/4"),
    )
    .await
    .expect("a full queue must not block the caller");
    assert_eq!(rejected, Err(AppError::QueueFull { capacity: 2 }));
    assert!(rejected.unwrap_err().is_backpressure());
    // The rejected key is released; the admitted ones stay in flight.
    assert_eq!(dispatcher.health().in_flight, 3);

    gate.open();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(extractor.calls(), 3);

    // Once drained, the rejected key is accepted.
    assert!(dispatcher.submit(JobKind::Gis, "https://2gis.ru/firm/4").await.is_ok());
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejection_envelope_names_queue_full() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(
        DispatcherConfig::default()
            .with_workers(1)
            .with_queue_capacity(1),
        extractor,
    );

    let d = dispatcher.clone();
    let running = tokio::spawn(async move { d.submit(JobKind::Google, CLINIC).await });
    gate.wait_entered(1).await;
    let d = dispatcher.clone();
    let queued = tokio::spawn(async move {
        d.submit(JobKind::Google, "https://www.google.com/maps/place/Other")
            .await
    });
    wait_queue_depth(&dispatcher, 1).await;

    let envelope = dispatcher
        .submit_envelope(JobKind::Google, "https://www.google.com/maps/place/Third")
        .await;
    assert!(!envelope.success);
    assert!(envelope.data.is_none());
    assert!(envelope.error.unwrap().starts_with("queue_full"));

    gate.open();
    assert!(running.await.unwrap().is_ok());
    assert!(queued.await.unwrap().is_ok());
    dispatcher.shutdown().await;
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_fans_out_and_is_not_cached() {
    let gate = Gate::new();
    let extractor = MockExtractor::with_responses(vec![
        Err(AppError::ExtractionFailure("navigation timeout".into())),
        Ok(json!({"name": "Clinic"})),
    ])
    .with_gate(gate.clone());
    let dispatcher = start_dispatcher(DispatcherConfig::default(), extractor.clone());

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let d = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            d.submit(JobKind::Doctors, CLINIC).await
        }));
    }
    gate.wait_entered(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.open();

    for task in tasks {
        assert_eq!(
            task.await.unwrap(),
            Err(AppError::ExtractionFailure("navigation timeout".into()))
        );
    }

    // A later request runs a fresh extraction.
    let retry = dispatcher.submit(JobKind::Doctors, CLINIC).await.unwrap();
    assert_eq!(retry, json!({"name": "Clinic"}));
    assert_eq!(extractor.calls(), 2);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_job_does_not_affect_other_keys() {
    let failing_url = "https://yandex.ru/maps/org/a/1";
    let healthy_url = "https://yandex.ru/maps/org/b/2";
    let gate = Gate::new();
    let extractor = MockExtractor::with_responses(Vec::new())
        .with_response_for(
            failing_url,
            Err(AppError::ExtractionFailure("h1 not found".into())),
        )
        .with_response_for(healthy_url, Ok(json!({"name": "Bakery"})))
        .with_gate(gate.clone());
    let dispatcher = start_dispatcher(DispatcherConfig::default().with_workers(2), extractor);

    let d = dispatcher.clone();
    let failing = tokio::spawn(async move { d.submit(JobKind::Yandex, failing_url).await });
    let d = dispatcher.clone();
    let healthy = tokio::spawn(async move { d.submit(JobKind::Yandex, healthy_url).await });
    gate.wait_entered(2).await;
    gate.open();

    assert_eq!(
        failing.await.unwrap(),
        Err(AppError::ExtractionFailure("h1 not found".into()))
    );
    assert_eq!(healthy.await.unwrap().unwrap(), json!({"name": "Bakery"}));
    dispatcher.shutdown().await;
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_caller_does_not_cancel_the_job() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(DispatcherConfig::default(), extractor.clone());

    let d = dispatcher.clone();
    let caller = tokio::spawn(async move { d.submit(JobKind::Google, CLINIC).await });
    gate.wait_entered(1).await;

    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    gate.open();
    wait_in_flight(&dispatcher, 0).await;

    // The abandoned caller's job still populated the cache.
    let cached = dispatcher.submit(JobKind::Google, CLINIC).await.unwrap();
    assert_eq!(cached, json!({ "resource": CLINIC }));
    assert_eq!(extractor.calls(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_joiner_leaves_other_waiters_intact() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(DispatcherConfig::default(), extractor.clone());

    let d = dispatcher.clone();
    let creator = tokio::spawn(async move { d.submit(JobKind::Google, CLINIC).await });
    gate.wait_entered(1).await;
    let d = dispatcher.clone();
    let joiner = tokio::spawn(async move { d.submit(JobKind::Google, CLINIC).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    creator.abort();
    gate.open();

    assert_eq!(joiner.await.unwrap().unwrap(), json!({ "resource": CLINIC }));
    assert_eq!(extractor.calls(), 1);
    dispatcher.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_finishes_running_and_abandons_queued() {
    let (extractor, gate) = gated_extractor();
    let dispatcher = start_dispatcher(
        DispatcherConfig::default().with_workers(1),
        extractor.clone(),
    );

    let d = dispatcher.clone();
    let running = tokio::spawn(async move { d.submit(JobKind::Gis, "https://2gis.ru/firm/1").await });
    gate.wait_entered(1).await;
    let d = dispatcher.clone();
    let queued = tokio::spawn(async move { d.submit(JobKind::Gis, "https://2gis.ru/firm/2").await });
    wait_queue_depth(&dispatcher, 1).await;

    let d = dispatcher.clone();
    let shutdown = tokio::spawn(async move { d.shutdown().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.open();

    assert_eq!(shutdown.await.unwrap(), 1);
    assert!(running.await.unwrap().is_ok());
    assert_eq!(queued.await.unwrap(), Err(AppError::JobAbandoned));
    assert_eq!(extractor.calls(), 1);
    assert_eq!(dispatcher.health().in_flight, 0);

    // Nothing is admitted after shutdown.
    assert_eq!(
        dispatcher.submit(JobKind::Gis, "https://2gis.ru/firm/3").await,
        Err(AppError::JobAbandoned)
    );
}
