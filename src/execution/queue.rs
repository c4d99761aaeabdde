//! Operation queue.
//!
//! [`OperationQueue`] is a Tokio-backed [`WorkQueue`]. A single dispatcher
//! task per queue moves operations from the pending list onto worker tasks:
//!
//! 1. wait while the queue is paused;
//! 2. take a concurrency permit (serial and limited queues only);
//! 3. pick the first pending operation, in submission order, whose
//!    dependencies are all terminal;
//! 4. run it on its own task, releasing the permit when it ends.
//!
//! Dependency edges decide readiness, not submission order. The dispatcher
//! sleeps on a [`Notify`] and is woken by submissions, pause changes,
//! completions, and by watchers on dependencies that live in other queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info_span, warn, Instrument};

use crate::core::observable::{ObserveError, Observable};
use crate::core::operation::{lock, Operation};
use crate::core::queue::{Concurrency, QueueError, WorkQueue};
use crate::core::state::OperationState;
use crate::core::types::{OperationId, QueueName};
use crate::events::{Event, EventBus};

struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    bus: Arc<EventBus>,
}

struct QueueInner {
    name: QueueName,
    concurrency: Concurrency,
    paused: Observable<bool>,
    pending: Mutex<VecDeque<Arc<dyn Operation>>>,
    running: Mutex<HashMap<OperationId, Arc<dyn Operation>>>,
    /// Dependencies that already have a wake-up watcher.
    watched: Mutex<HashSet<OperationId>>,
    outstanding: Observable<usize>,
    wake: Notify,
    semaphore: Option<Arc<Semaphore>>,
    dispatching: AtomicBool,
    closed: AtomicBool,
    events: OnceLock<EventSink>,
}

/// A queue that runs operations under a concurrency budget.
///
/// Operations are dispatched by a background task spawned on the current
/// Tokio runtime the first time an operation is added. Dropping the queue
/// lets already-submitted work drain; a queue dropped while paused discards
/// its pending operations instead.
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Create a queue with the given name and concurrency budget.
    pub fn new(name: impl Into<String>, concurrency: Concurrency) -> Self {
        let semaphore = concurrency
            .limit()
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Self {
            inner: Arc::new(QueueInner {
                name: QueueName::new(name),
                concurrency,
                paused: Observable::new(false),
                pending: Mutex::new(VecDeque::new()),
                running: Mutex::new(HashMap::new()),
                watched: Mutex::new(HashSet::new()),
                outstanding: Observable::new(0),
                wake: Notify::new(),
                semaphore,
                dispatching: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events: OnceLock::new(),
            }),
        }
    }

    /// Attach an event bus. Only the first bus attached is used.
    pub fn with_event_bus(self, bus: Arc<EventBus>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink {
            tx,
            rx: Mutex::new(Some(rx)),
            bus,
        };
        if self.inner.events.set(sink).is_err() {
            warn!(queue = %self.inner.name, "event bus already attached, ignoring");
        }
        self
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.inner.name
    }

    /// Number of operations currently running.
    pub fn running_count(&self) -> usize {
        lock(&self.inner.running).len()
    }

    /// Wait until every submitted operation is terminal.
    pub async fn wait_until_all_finished(&self, timeout: Duration) -> Result<(), QueueError> {
        match self.inner.outstanding.wait_for_value(0, timeout).await {
            Ok(_) => Ok(()),
            Err(ObserveError::Timeout(_)) | Err(ObserveError::Closed) => Err(QueueError::Timeout {
                queue: self.inner.name.to_string(),
                timeout,
                remaining: self.inner.outstanding.get(),
            }),
        }
    }
}

impl WorkQueue for OperationQueue {
    fn with_concurrency(name: &str, concurrency: Concurrency) -> Self {
        Self::new(name, concurrency)
    }

    fn name(&self) -> &str {
        self.inner.name.as_str()
    }

    fn concurrency(&self) -> Concurrency {
        self.inner.concurrency
    }

    fn set_paused(&self, paused: bool) {
        let changed = {
            // Flip under the pending lock so the dispatcher never picks an
            // operation after a pause has been observed by the caller.
            let _pending = lock(&self.inner.pending);
            self.inner.paused.set(paused) != paused
        };
        if changed {
            debug!(queue = %self.inner.name, paused, "queue gate changed");
            self.inner.emit(Event::queue_paused(self.inner.name.clone(), paused));
            self.inner.wake.notify_one();
        }
    }

    fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }

    fn add_operation(&self, operation: Arc<dyn Operation>) -> Result<(), QueueError> {
        let state = operation.state();
        if state != OperationState::NotStarted {
            return Err(QueueError::NotPending {
                id: operation.id(),
                state,
            });
        }

        self.inner.ensure_dispatcher()?;

        if !operation.core().mark_enqueued() {
            return Err(QueueError::AlreadyEnqueued(operation.id()));
        }

        debug!(
            queue = %self.inner.name,
            operation = %operation.id(),
            name = operation.name(),
            dependencies = operation.dependencies().len(),
            "operation enqueued"
        );

        self.inner.outstanding.update(|n| {
            *n += 1;
            Some(())
        });
        let event = Event::operation_enqueued(
            operation.id(),
            operation.name(),
            self.inner.name.clone(),
        );
        lock(&self.inner.pending).push_back(operation);
        self.inner.emit(event);
        self.inner.wake.notify_one();
        Ok(())
    }

    fn cancel_all(&self) {
        let mut owned: Vec<Arc<dyn Operation>> =
            lock(&self.inner.pending).iter().cloned().collect();
        owned.extend(lock(&self.inner.running).values().cloned());

        debug!(queue = %self.inner.name, affected = owned.len(), "cancelling all operations");
        for op in &owned {
            op.cancel();
        }

        self.inner
            .emit(Event::queue_cancelled_all(self.inner.name.clone(), owned.len()));
        self.inner.wake.notify_one();
    }

    fn operation_count(&self) -> usize {
        self.inner.outstanding.get()
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .field("paused", &self.inner.paused.get())
            .field("outstanding", &self.inner.outstanding.get())
            .finish()
    }
}

impl QueueInner {
    fn emit(&self, event: Event) {
        if let Some(sink) = self.events.get() {
            let _ = sink.tx.send(event);
        }
    }

    /// Spawn the dispatcher (and event pump) on first use.
    fn ensure_dispatcher(self: &Arc<Self>) -> Result<(), QueueError> {
        if self.dispatching.load(Ordering::SeqCst) {
            return Ok(());
        }
        let handle =
            Handle::try_current().map_err(|_| QueueError::NoRuntime(self.name.to_string()))?;
        if self.dispatching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(sink) = self.events.get() {
            if let Some(mut rx) = lock(&sink.rx).take() {
                let bus = Arc::clone(&sink.bus);
                handle.spawn(async move {
                    while let Some(event) = rx.recv().await {
                        bus.emit(event).await;
                    }
                });
            }
        }

        let span = info_span!("queue_dispatch", queue = %self.name, concurrency = %self.concurrency);
        handle.spawn(dispatch_loop(Arc::clone(self)).instrument(span));
        Ok(())
    }

    /// Remove and return the first ready operation, unless paused.
    fn next_ready(&self) -> Option<Arc<dyn Operation>> {
        let mut pending = lock(&self.pending);
        if self.paused.get() {
            return None;
        }
        let position = pending.iter().position(|op| op.is_ready())?;
        pending.remove(position)
    }

    /// Make sure every unfinished dependency of a pending operation wakes
    /// the dispatcher when it reaches a terminal state.
    fn watch_blockers(self: &Arc<Self>) {
        let blockers: Vec<Arc<dyn Operation>> = lock(&self.pending)
            .iter()
            .flat_map(|op| op.dependencies())
            .filter(|dep| !dep.is_finished())
            .collect();

        let mut watched = lock(&self.watched);
        for dep in blockers {
            let id = dep.id();
            if !watched.insert(id) {
                continue;
            }
            let mut rx = dep.subscribe_state();
            let queue: Weak<QueueInner> = Arc::downgrade(self);
            tokio::spawn(async move {
                let _ = rx.wait_for(|s| s.is_terminal()).await;
                if let Some(queue) = queue.upgrade() {
                    lock(&queue.watched).remove(&id);
                    queue.wake.notify_one();
                }
            });
        }
    }

    fn run(self: &Arc<Self>, op: Arc<dyn Operation>, permit: Option<OwnedSemaphorePermit>) {
        lock(&self.running).insert(op.id(), Arc::clone(&op));

        let queue = Arc::clone(self);
        let span = info_span!(
            "queue_operation",
            queue = %self.name,
            operation = %op.id(),
            name = op.name(),
        );

        tokio::spawn(
            async move {
                let started = !op.is_cancelled();
                if started {
                    queue.emit(Event::operation_started(op.id(), queue.name.clone()));
                }
                let start_time = Instant::now();

                let worker = Arc::clone(&op);
                if let Err(e) = tokio::spawn(async move { worker.start().await }).await {
                    warn!(error = %e, "operation body panicked");
                    op.core().record_error(format!("operation panicked: {}", e));
                    if op.state() == OperationState::Executing {
                        let _ = op.core().transition(OperationState::Finished);
                    }
                }
                let duration = start_time.elapsed();
                drop(permit);

                lock(&queue.running).remove(&op.id());
                let state = op.state();
                debug!(state = %state, duration_ms = %duration.as_millis(), "operation ended");
                queue.emit(Event::operation_terminal(
                    op.id(),
                    queue.name.clone(),
                    state,
                    started,
                    duration,
                    op.core().last_error(),
                ));
                queue.finish_one();
            }
            .instrument(span),
        );
    }

    fn finish_one(&self) {
        let remaining = self.outstanding.update(|n| {
            *n = n.saturating_sub(1);
            Some(*n)
        });
        if remaining == Some(0) {
            debug!(queue = %self.name, "queue drained");
            self.emit(Event::queue_drained(self.name.clone()));
        }
        self.wake.notify_one();
    }

    /// Drop pending work when the queue is closed while paused.
    fn discard_pending(&self) {
        let dropped: Vec<Arc<dyn Operation>> = lock(&self.pending).drain(..).collect();
        if dropped.is_empty() {
            return;
        }
        warn!(
            queue = %self.name,
            discarded = dropped.len(),
            "queue dropped while paused, discarding pending operations"
        );
        for _ in &dropped {
            self.finish_one();
        }
    }
}

async fn dispatch_loop(queue: Arc<QueueInner>) {
    let mut paused_rx = queue.paused.subscribe();
    debug!("dispatcher started");

    loop {
        if queue.closed.load(Ordering::SeqCst) {
            if queue.paused.get() {
                queue.discard_pending();
                break;
            }
            if lock(&queue.pending).is_empty() {
                break;
            }
        }

        if queue.paused.get() {
            tokio::select! {
                _ = paused_rx.changed() => {}
                _ = queue.wake.notified() => {}
            }
            continue;
        }

        let permit = match &queue.semaphore {
            Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        match queue.next_ready() {
            Some(op) => queue.run(op, permit),
            None => {
                drop(permit);
                queue.watch_blockers();
                queue.wake.notified().await;
            }
        }
    }

    debug!("dispatcher stopped");
}
