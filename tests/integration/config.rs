//! Configuration-driven suite runs.

use opcheck::{ConfigLoader, ConformanceSuite, QueueReuse};
use std::time::Duration;

use crate::common::StepCase;

/// Test: A configuration file selects shared queues and a concurrent budget.
#[tokio::test]
async fn test_suite_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opcheck.yaml");
    std::fs::write(
        &path,
        r#"
timeout_secs: 4
constrained: false
queue_reuse: shared
concurrent_limit: 2
"#,
    )
    .unwrap();

    let config = ConfigLoader::load(&path).unwrap();
    let mut suite = ConformanceSuite::new(StepCase).with_config(&config);

    assert_eq!(suite.timeout(), Duration::from_secs(4));

    let report = suite.run_all().await;
    suite.teardown();

    assert!(report.passed(), "{report}");
    assert!(report
        .cases
        .iter()
        .all(|c| c.queue_name == "steps.serial" || c.queue_name == "steps.concurrent"));
}

/// Test: Invalid configuration is rejected before any suite runs.
#[test]
fn test_invalid_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opcheck.yaml");
    std::fs::write(&path, "timeout_secs: -1\n").unwrap();

    let err = ConfigLoader::load(&path).unwrap_err();
    assert!(err.to_string().contains("timeout_secs"));
}

/// Test: Fresh queues are the default.
#[test]
fn test_default_queue_reuse_is_fresh() {
    let config = ConfigLoader::parse("timeout_secs: 1").unwrap();
    assert_eq!(config.queue_reuse, QueueReuse::Fresh);
}
