//! Test generation for operation test cases.

/// Generate a test module running every conformance case for a test case.
///
/// Expands to a module named `$module` containing one `#[tokio::test]` per
/// guarantee and queue kind. `$case` is evaluated afresh for every test.
/// Each test panics with the failure diagnostic if its guarantee is
/// violated.
///
/// ```ignore
/// opcheck::operation_conformance_tests!(checksum_conformance, ChecksumCase);
/// ```
#[macro_export]
macro_rules! operation_conformance_tests {
    ($module:ident, $case:expr) => {
        mod $module {
            #[allow(unused_imports)]
            use super::*;

            async fn run(
                guarantee: $crate::testing::Guarantee,
                kind: $crate::testing::QueueKind,
            ) {
                let suite = $crate::testing::ConformanceSuite::new($case);
                if let Err(failure) = suite.run_case(guarantee, kind).await {
                    panic!("{}", failure);
                }
            }

            #[tokio::test]
            async fn type_conformance_serial() {
                run(
                    $crate::testing::Guarantee::TypeConformance,
                    $crate::testing::QueueKind::Serial,
                )
                .await;
            }

            #[tokio::test]
            async fn type_conformance_concurrent() {
                run(
                    $crate::testing::Guarantee::TypeConformance,
                    $crate::testing::QueueKind::Concurrent,
                )
                .await;
            }

            #[tokio::test]
            async fn completion_serial() {
                run(
                    $crate::testing::Guarantee::Completion,
                    $crate::testing::QueueKind::Serial,
                )
                .await;
            }

            #[tokio::test]
            async fn completion_concurrent() {
                run(
                    $crate::testing::Guarantee::Completion,
                    $crate::testing::QueueKind::Concurrent,
                )
                .await;
            }

            #[tokio::test]
            async fn dependency_serial() {
                run(
                    $crate::testing::Guarantee::Dependency,
                    $crate::testing::QueueKind::Serial,
                )
                .await;
            }

            #[tokio::test]
            async fn dependency_concurrent() {
                run(
                    $crate::testing::Guarantee::Dependency,
                    $crate::testing::QueueKind::Concurrent,
                )
                .await;
            }

            #[tokio::test]
            async fn cancellation_serial() {
                run(
                    $crate::testing::Guarantee::Cancellation,
                    $crate::testing::QueueKind::Serial,
                )
                .await;
            }

            #[tokio::test]
            async fn cancellation_concurrent() {
                run(
                    $crate::testing::Guarantee::Cancellation,
                    $crate::testing::QueueKind::Concurrent,
                )
                .await;
            }
        }
    };
}
