//! The suite must catch each kind of contract violation.

use opcheck::{ConformanceFailure, ConformanceReport, ConformanceSuite, Guarantee, QueueKind, QueueReuse};

use crate::common::{BlockCase, DeafCase, FifoQueue, HangingCase, SharedCoreCase, SHORT_TIMEOUT};

/// Test: An operation ignoring cancellation fails the cancellation check.
#[tokio::test]
async fn test_ignored_cancel_is_reported() {
    let suite = ConformanceSuite::new(DeafCase);

    for kind in QueueKind::ALL {
        let failure = suite
            .run_case(Guarantee::Cancellation, kind)
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            ConformanceFailure::CancellationTimeout { timeout, .. } if timeout == SHORT_TIMEOUT
        ));
        assert!(failure
            .to_string()
            .contains("the operation did not move to the cancelled state within the timeout"));
    }
}

/// Test: Other guarantees still pass for an operation ignoring cancellation.
#[tokio::test]
async fn test_failures_stay_local_to_their_case() {
    let report = ConformanceSuite::new(DeafCase).run_all().await;

    let failed: Vec<Guarantee> = report.failures().map(|c| c.guarantee).collect();
    assert_eq!(
        failed,
        vec![Guarantee::Cancellation, Guarantee::Cancellation],
        "{report}"
    );
    assert_eq!(report.cases.len(), 8);
}

/// Test: An operation that never ends fails the completion check.
#[tokio::test]
async fn test_hanging_operation_misses_completion() {
    let suite = ConformanceSuite::new(HangingCase);

    let failure = suite
        .run_case(Guarantee::Completion, QueueKind::Serial)
        .await
        .unwrap_err();

    match &failure {
        ConformanceFailure::CompletionTimeout { queue, .. } => {
            assert_eq!(queue, "hanging.completion.serial");
        }
        other => panic!("unexpected failure: {other}"),
    }
    assert!(failure
        .to_string()
        .starts_with("the operation completion callback did not execute within the timeout"));
}

fn failed_cases(report: &ConformanceReport) -> Vec<(Guarantee, QueueKind)> {
    report
        .failures()
        .map(|c| (c.guarantee, c.queue_kind))
        .collect()
}

/// Test: Work left behind on a shared queue does not fail later cases.
#[tokio::test]
async fn test_shared_queues_keep_failures_local() {
    let fresh = ConformanceSuite::new(HangingCase).run_all().await;
    let mut shared_suite = ConformanceSuite::new(HangingCase).with_queue_reuse(QueueReuse::Shared);
    let shared = shared_suite.run_all().await;
    shared_suite.teardown();

    let expected = vec![
        (Guarantee::Completion, QueueKind::Serial),
        (Guarantee::Completion, QueueKind::Concurrent),
    ];
    assert_eq!(failed_cases(&fresh), expected, "{fresh}");
    assert_eq!(failed_cases(&shared), expected, "{shared}");
}

/// Test: Instances sharing lifecycle state are not fresh operations.
#[tokio::test]
async fn test_shared_core_fails_type_conformance() {
    let suite = ConformanceSuite::new(SharedCoreCase);

    let failure = suite
        .run_case(Guarantee::TypeConformance, QueueKind::Serial)
        .await
        .unwrap_err();

    assert!(matches!(failure, ConformanceFailure::TypeConformance { .. }));
    assert!(failure.to_string().contains("same operation"));
}

/// Test: A queue that ignores dependency edges is caught.
#[tokio::test]
async fn test_queue_ignoring_dependencies_is_caught() {
    let suite = ConformanceSuite::<_, FifoQueue>::with_queue(BlockCase).with_timeout(SHORT_TIMEOUT * 10);

    let failure = suite
        .run_case(Guarantee::Dependency, QueueKind::Serial)
        .await
        .unwrap_err();

    assert!(
        matches!(failure, ConformanceFailure::DependencyOrder { .. }),
        "unexpected failure: {failure}"
    );
}

/// Test: A custom queue honouring the contract elsewhere passes those cases.
#[tokio::test]
async fn test_custom_queue_passes_completion_and_cancellation() {
    let suite = ConformanceSuite::<_, FifoQueue>::with_queue(BlockCase).with_timeout(SHORT_TIMEOUT * 10);

    for kind in QueueKind::ALL {
        suite.run_case(Guarantee::Completion, kind).await.unwrap();
        suite.run_case(Guarantee::Cancellation, kind).await.unwrap();
    }
}
