//! Conformance suite runs for well-behaved operations.

use opcheck::{ConformanceSuite, Guarantee, QueueKind};
use std::time::Duration;

use crate::common::{BlockCase, DelayCase, StepCase};

opcheck::operation_conformance_tests!(block_operation, crate::common::BlockCase);
opcheck::operation_conformance_tests!(delay_operation, crate::common::DelayCase);
opcheck::operation_conformance_tests!(step_operation, crate::common::StepCase);

/// Test: A full run reports every guarantee on both queue kinds.
#[tokio::test]
async fn test_report_covers_every_case() {
    let report = ConformanceSuite::new(BlockCase)
        .with_timeout(Duration::from_secs(5))
        .run_all()
        .await;

    assert!(report.passed(), "{report}");
    for guarantee in Guarantee::ALL {
        for kind in QueueKind::ALL {
            assert!(
                report
                    .cases
                    .iter()
                    .any(|c| c.guarantee == guarantee && c.queue_kind == kind),
                "missing {guarantee}::{kind}"
            );
        }
    }
}

/// Test: Cases can be run individually.
#[tokio::test]
async fn test_single_case() {
    let suite = ConformanceSuite::new(StepCase).with_timeout(Duration::from_secs(5));

    suite
        .run_case(Guarantee::Dependency, QueueKind::Concurrent)
        .await
        .unwrap();
    suite
        .run_case(Guarantee::Cancellation, QueueKind::Serial)
        .await
        .unwrap();
}

/// Test: The report serializes for machine consumption.
#[tokio::test]
async fn test_report_serializes_to_json() {
    let report = ConformanceSuite::new(DelayCase)
        .with_timeout(Duration::from_secs(5))
        .run_all()
        .await;

    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["suite"], "delay");
    assert_eq!(json["cases"].as_array().unwrap().len(), 8);
    assert_eq!(json["cases"][0]["guarantee"], "type_conformance");
    assert_eq!(json["cases"][0]["queue_kind"], "serial");
    assert!(json["cases"][0]["failure"].is_null());
}
