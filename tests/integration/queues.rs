//! Dependency graphs and lifecycle events across queues.

use async_trait::async_trait;
use opcheck::testing::{DelayOperation, Expectation};
use opcheck::{
    BlockOperation, Concurrency, Event, EventBus, EventHandler, Operation, OperationQueue,
    OperationState, WorkQueue,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::StepOperation;

/// Recording event handler for verifying events.
struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

fn recording_block(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<BlockOperation> {
    let log = Arc::clone(log);
    let entry = name.to_string();
    Arc::new(BlockOperation::new(move || log.lock().unwrap().push(entry)).with_name(name))
}

/// Test: A diamond spread over a serial and a concurrent queue runs in
/// dependency order.
///
/// ```text
///        fetch
///       /     \
///   parse     index      (concurrent queue)
///       \     /
///       publish          (serial queue)
/// ```
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_diamond_across_queues() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let fetch = recording_block("fetch", &log);
    let parse = recording_block("parse", &log);
    let index = recording_block("index", &log);
    let publish = recording_block("publish", &log);

    parse.add_dependency(fetch.clone()).unwrap();
    index.add_dependency(fetch.clone()).unwrap();
    publish.add_dependency(parse.clone()).unwrap();
    publish.add_dependency(index.clone()).unwrap();

    let serial = OperationQueue::serial("publish");
    let concurrent = OperationQueue::concurrent("work");

    // Submit sinks first so only the edges can produce the right order.
    serial.add_operation(publish.clone()).unwrap();
    concurrent.add_operation(index.clone()).unwrap();
    concurrent.add_operation(parse.clone()).unwrap();
    concurrent.add_operation(fetch.clone()).unwrap();

    serial
        .wait_until_all_finished(Duration::from_secs(5))
        .await
        .unwrap();
    concurrent
        .wait_until_all_finished(Duration::from_secs(5))
        .await
        .unwrap();

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    assert_eq!(log[0], "fetch");
    assert_eq!(log[3], "publish");
    for op in [&fetch, &parse, &index, &publish] {
        assert_eq!(op.state(), OperationState::Finished);
    }
}

/// Test: Cancelling a dependency still releases its dependents.
#[tokio::test]
async fn test_cancelled_dependency_releases_dependent() {
    let queue = OperationQueue::serial("cancel-chain");
    let upstream = Arc::new(DelayOperation::new(Duration::from_secs(30)));
    let downstream = Arc::new(StepOperation::new(3));
    downstream.add_dependency(upstream.clone()).unwrap();

    let done = Expectation::new("downstream finished");
    let fulfiller = done.fulfiller();
    downstream.set_completion(Box::new(move || fulfiller.fulfill()));

    queue.add_operation(upstream.clone()).unwrap();
    queue.add_operation(downstream.clone()).unwrap();

    upstream
        .core()
        .state_cell()
        .wait_for_value(OperationState::Executing, Duration::from_secs(2))
        .await
        .unwrap();
    upstream.cancel();

    done.wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(upstream.state(), OperationState::Cancelled);
    assert_eq!(downstream.state(), OperationState::Finished);
    assert_eq!(downstream.completed(), 3);
}

/// Test: Bulk cancel on a paused queue cancels every operation without
/// running any body.
#[tokio::test]
async fn test_bulk_cancel_before_resume() {
    let queue = OperationQueue::new("bulk", Concurrency::limited(2));
    queue.set_paused(true);

    let ops: Vec<Arc<StepOperation>> = (0..4).map(|_| Arc::new(StepOperation::new(10))).collect();
    for op in &ops {
        queue.add_operation(op.clone()).unwrap();
    }
    queue.cancel_all();
    queue.set_paused(false);

    queue
        .wait_until_all_finished(Duration::from_secs(5))
        .await
        .unwrap();

    for op in &ops {
        assert!(op.is_cancelled());
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(op.completed(), 0);
    }
}

/// Test: Handlers observe the queue lifecycle.
#[tokio::test]
async fn test_events_for_cancel_and_finish() {
    let bus = Arc::new(EventBus::new());
    let handler = RecordingHandler::new();
    bus.register(handler.clone()).await;

    let queue = OperationQueue::serial("observed").with_event_bus(bus);
    queue.set_paused(true);

    let kept = Arc::new(BlockOperation::empty().with_name("kept"));
    let dropped = Arc::new(BlockOperation::empty().with_name("dropped"));
    queue.add_operation(kept.clone()).unwrap();
    queue.add_operation(dropped.clone()).unwrap();
    dropped.cancel();
    queue.set_paused(false);

    queue
        .wait_until_all_finished(Duration::from_secs(5))
        .await
        .unwrap();
    // Events are delivered by a background task.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = handler.events().await;
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::QueuePaused { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::QueueResumed { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::OperationFinished { operation_id, error: None, .. } if *operation_id == kept.id()
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::OperationCancelled { operation_id, started: false, .. } if *operation_id == dropped.id()
    )));
    assert!(matches!(events.last(), Some(Event::QueueDrained { .. })));
}
