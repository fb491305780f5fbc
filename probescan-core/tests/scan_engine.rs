mod support;

use std::collections::BTreeSet;
use std::time::Duration;

use probescan_core::config::{BroadcastPolicy, HandoffOrder, ScanSettings};
use probescan_core::ids::{Identifier, IdentifierRange, IdentifierSet};
use probescan_core::scan::{Scanner, StopReason, WorkerExit};
use probescan_core::store::schema::Schema;
use probescan_core::store::{Ledger, ScanStore, SqliteScanStore};
use tokio_util::sync::CancellationToken;

use support::{Answer, FakeProbe, RecordingStore, campaign_schema};

async fn store(schema: Schema) -> RecordingStore<SqliteScanStore> {
    RecordingStore::new(
        SqliteScanStore::open_in_memory(schema, BroadcastPolicy::Cycle)
            .await
            .expect("in-memory store"),
    )
}

fn settings(workers: usize, range: IdentifierRange) -> ScanSettings {
    ScanSettings {
        workers,
        range,
        ..ScanSettings::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_runs_until_identifiers_are_exhausted() {
    let probe = FakeProbe::new(Duration::ZERO, |id| {
        if id % 2 == 0 {
            Answer::Present
        } else {
            Answer::Absent
        }
    });
    let scanner = Scanner::new(
        store(campaign_schema()).await,
        probe.clone(),
        settings(4, IdentifierRange::default()),
    );

    let report = scanner
        .run(IdentifierSet::range(1, 101), CancellationToken::new())
        .await
        .expect("scan");

    assert_eq!(report.stop, StopReason::Exhausted);
    assert!(report.is_clean());
    assert_eq!(report.recorded, 100);
    assert_eq!(report.present, 50);
    // one campaign row and two event rows per present payload
    assert_eq!(report.rows_written, 150);
    assert_eq!(report.workers.len(), 4);
    assert!(
        report
            .workers
            .iter()
            .all(|worker| worker.exit == WorkerExit::Exhausted)
    );

    let mut calls = probe.calls();
    calls.sort_unstable();
    assert_eq!(calls, (1..=100).collect::<Vec<_>>());
    assert_eq!(scanner.store().count().await.expect("count"), 100);
    assert!(scanner.store().holes().await.expect("holes").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_range_payload_stops_and_drains() {
    let probe = FakeProbe::new(Duration::from_millis(1), |_| Answer::Present);
    let scanner = Scanner::new(
        store(campaign_schema()).await,
        probe.clone(),
        settings(4, IdentifierRange::new(1, Some(50))),
    );

    let report = scanner
        .run(IdentifierSet::range(1, 10_000), CancellationToken::new())
        .await
        .expect("scan");

    let StopReason::OutOfRange(trigger) = report.stop else {
        panic!("expected out-of-range stop, got {:?}", report.stop);
    };
    assert!(trigger > 50);
    assert!(report.workers.iter().all(|worker| !worker.is_failure()));

    // No probe starts after run returns, and every started probe was persisted.
    let calls_at_return = probe.call_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.call_count(), calls_at_return);
    assert!(calls_at_return < 10_000);

    let checked = scanner.store().checked().await.expect("checked");
    let probed: BTreeSet<Identifier> = probe.calls().into_iter().collect();
    assert_eq!(checked, probed);
    assert_eq!(report.recorded as usize, calls_at_return);
    assert!(checked.contains(&trigger));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn external_cancellation_persists_in_flight_results() {
    let probe = FakeProbe::new(Duration::from_millis(5), |_| Answer::Absent);
    let scanner = Scanner::new(
        store(Schema::empty()).await,
        probe.clone(),
        settings(3, IdentifierRange::default()),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.cancel();
    });

    let report = scanner
        .run(IdentifierSet::range(1, 1_000_000), cancel)
        .await
        .expect("scan");

    assert_eq!(report.stop, StopReason::Cancelled);
    assert!(
        report
            .workers
            .iter()
            .all(|worker| worker.exit == WorkerExit::Stopped)
    );
    let calls = probe.call_count();
    assert!(calls > 0 && calls < 1_000_000);
    assert_eq!(
        scanner.store().count().await.expect("count"),
        calls as u64
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_worker_does_not_stop_its_peers() {
    // position 4 of 0..30 belongs to worker 1 of 3
    let probe = FakeProbe::new(Duration::ZERO, |id| {
        if id == 4 { Answer::Fail } else { Answer::Absent }
    });
    let scanner = Scanner::new(
        store(Schema::empty()).await,
        probe.clone(),
        settings(3, IdentifierRange::new(0, None)),
    );

    let report = scanner
        .run(IdentifierSet::range(0, 30), CancellationToken::new())
        .await
        .expect("scan");

    assert_eq!(report.stop, StopReason::Exhausted);
    assert!(!report.is_clean());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].worker, 1);
    assert_eq!(failures[0].probed, 1);
    assert!(matches!(failures[0].exit, WorkerExit::Failed(_)));

    let expected: BTreeSet<Identifier> =
        (0..30).filter(|id| id % 3 != 1 || *id < 4).collect();
    assert_eq!(scanner.store().checked().await.expect("checked"), expected);
    // 4, 7, .., 28 were never probed
    let holes = scanner.store().holes().await.expect("holes");
    assert_eq!(holes.len(), 9);
    assert!(holes.iter().all(|hole| hole.size == 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resumed_scan_skips_checked_identifiers() {
    let scanner = Scanner::new(
        store(Schema::empty()).await,
        FakeProbe::new(Duration::ZERO, |_| Answer::Absent),
        settings(2, IdentifierRange::default()),
    );
    for id in [2, 3, 5] {
        scanner.store().record(id, None).await.expect("seed");
    }

    let checked = scanner.store().checked().await.expect("checked");
    let remaining = IdentifierSet::range(1, 8).without(&checked);
    assert_eq!(remaining, IdentifierSet::List(vec![1, 4, 6, 7]));

    let report = scanner
        .run(remaining, CancellationToken::new())
        .await
        .expect("scan");
    assert_eq!(report.recorded, 4);

    let mut order = scanner.store().order();
    order.sort_unstable();
    assert_eq!(order, vec![1, 2, 3, 4, 5, 6, 7]);
    assert!(scanner.store().holes().await.expect("holes").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifo_single_worker_persists_in_probe_order() {
    let scanner = Scanner::new(
        store(Schema::empty()).await,
        FakeProbe::new(Duration::from_millis(1), |_| Answer::Absent),
        ScanSettings {
            workers: 1,
            order: HandoffOrder::Fifo,
            ..ScanSettings::default()
        },
    );

    scanner
        .run(IdentifierSet::List(vec![9, 3, 14, 1, 7]), CancellationToken::new())
        .await
        .expect("scan");

    assert_eq!(scanner.store().order(), vec![9, 3, 14, 1, 7]);
}

#[tokio::test]
async fn zero_workers_is_a_configuration_error() {
    let scanner = Scanner::new(
        store(Schema::empty()).await,
        FakeProbe::new(Duration::ZERO, |_| Answer::Absent),
        settings(0, IdentifierRange::default()),
    );

    let err = scanner
        .run(IdentifierSet::range(1, 10), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, probescan_core::ScanError::InvalidConfig(_)));
}
