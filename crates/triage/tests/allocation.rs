//! End-to-end allocation properties against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use triage::{
    AdmissionService, AgeRange, AllocationError, EngineConfig, Hospital, InMemoryStore,
    IsolationLevel, Report, SeverityScorer, SymptomLevel, TransactionalAllocator, priority,
};

fn level(n: u8) -> SymptomLevel {
    SymptomLevel::new(n).unwrap()
}

fn store_with_reports(beds: u32, reports: u64) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    store.insert_hospital(Hospital::new(1, "응급센터", 10).with_available_beds(beds));
    for id in 1..=reports {
        store.insert_report(Report::new(id, level(3)).with_age_range(AgeRange::Adult));
    }
    store
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_bed_goes_to_exactly_one_report() {
    let store = store_with_reports(1, 8);
    let allocator = Arc::new(TransactionalAllocator::new(store.clone()));

    let attempts = (1..=8).map(|id| {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move { allocator.allocate_committed(id, 1).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AllocationError::ResourceExhausted { hospital_id: 1 }))
    );
    assert_eq!(store.hospital(1).unwrap().available_beds, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_report_is_admitted_once() {
    let store = store_with_reports(5, 1);
    let allocator = Arc::new(
        TransactionalAllocator::new(store.clone())
            .with_allocate_isolation(IsolationLevel::RepeatableRead),
    );

    let attempts = (0..6).map(|_| {
        let allocator = Arc::clone(&allocator);
        tokio::spawn(async move { allocator.allocate_committed(1, 1).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(AllocationError::AlreadyAllocated { report_id: 1 })))
            .count(),
        5
    );
    assert_eq!(store.hospital(1).unwrap().available_beds, 4);
}

#[tokio::test]
async fn allocate_then_withdraw_restores_beds() {
    let store = store_with_reports(3, 2);
    let allocator = TransactionalAllocator::new(store.clone());

    allocator.allocate_committed(1, 1).await.unwrap();
    allocator.allocate_committed(2, 1).await.unwrap();
    assert_eq!(store.hospital(1).unwrap().available_beds, 1);

    allocator.withdraw_committed(1).await.unwrap();
    allocator.withdraw_committed(2).await.unwrap();
    assert_eq!(store.hospital(1).unwrap().available_beds, 3);

    // A withdrawn report can be admitted again
    allocator.allocate_committed(1, 1).await.unwrap();
    assert_eq!(store.hospital(1).unwrap().available_beds, 2);
}

#[tokio::test]
async fn beds_never_leave_bounds_over_mixed_sequence() {
    let store = store_with_reports(2, 4);
    let allocator = TransactionalAllocator::new(store.clone());

    for round in 0..3 {
        for id in 1..=4 {
            let _ = allocator.allocate_committed(id, 1).await;
            let beds = store.hospital(1).unwrap().available_beds;
            assert!(beds <= 2, "round {round}: {beds} beds exceeds capacity");
        }
        for id in 1..=4 {
            let _ = allocator.withdraw_committed(id).await;
        }
        assert_eq!(store.hospital(1).unwrap().available_beds, 2);
    }
}

#[tokio::test(start_paused = true)]
async fn slow_transaction_resolves_retry_then_commits() {
    let store = Arc::new(
        InMemoryStore::new().with_transaction_latency(Duration::from_secs(5)),
    );
    store.insert_hospital(Hospital::new(1, "응급센터", 3));
    store.insert_report(Report::new(1, level(5)));

    let service = Arc::new(AdmissionService::new(
        store.clone(),
        EngineConfig::default().with_wait_timeout(Duration::from_secs(2)),
    ));
    service.start().await;

    let started = tokio::time::Instant::now();
    let admission = service.request_allocation(1, 1).await.unwrap();
    assert!(!admission.is_admitted());
    assert_eq!(admission.status(), "retry");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2) && waited < Duration::from_millis(2100));
    assert_eq!(service.broker().pending(), 0);

    // Not yet committed
    assert!(!store.report(1).unwrap().is_sent);

    tokio::time::sleep(Duration::from_secs(4)).await;
    let report = store.report(1).unwrap();
    assert!(report.is_sent);
    assert_eq!(report.hospital_id, Some(1));
    assert_eq!(store.hospital(1).unwrap().available_beds, 2);
}

#[tokio::test]
async fn queued_requests_run_in_priority_order() {
    let store = Arc::new(InMemoryStore::new());
    store.insert_hospital(Hospital::new(1, "응급센터", 1));
    store.insert_report(Report::new(1, level(5)).with_age_range(AgeRange::Adult));
    store.insert_report(Report::new(2, level(5)).with_age_range(AgeRange::Infant));

    let service = AdmissionService::new(store.clone(), EngineConfig::default());
    let adult = service.submit_allocation(1, 1).await.unwrap();
    let infant = service.submit_allocation(2, 1).await.unwrap();
    assert!(infant.priority < adult.priority);

    service.start().await;
    let timeout = Some(Duration::from_secs(1));
    let infant_outcome = service.await_outcome(infant, timeout).await;
    let adult_outcome = service.await_outcome(adult, timeout).await;

    assert!(infant_outcome.unwrap().is_admitted());
    assert!(matches!(
        adult_outcome,
        Err(AllocationError::ResourceExhausted { hospital_id: 1 })
    ));
    service.shutdown().await;
}

#[test]
fn scored_report_feeds_priority() {
    let scorer = SeverityScorer::new();
    let symptoms = ["흉통", "흉통", "두통"];
    assert_eq!(scorer.score(&symptoms), 21);
    let severity = scorer.level(&symptoms);
    assert_eq!(severity.get(), 2);

    assert_eq!(priority(level(5), Some(AgeRange::Infant)), 2);
    assert_eq!(priority(level(5), Some(AgeRange::Adult)), 5);
    assert_eq!(priority(severity, Some(AgeRange::Pregnant)), 4);
}
