//! Bounded-concurrency Task Manager: a priority queue plus a configurable
//! max-in-flight limit, optional per-task timeout, and lifecycle events
//! (`task:started`/`task:completed`/`task:failed`/`task:cancelled`)
//! broadcast through the same Hook Bus the rest of the core uses.
//!
//! Not required by any other core component — it is the canonical pool
//! adjacent to the core that callers scheduling work are expected to
//! share. The ready-queue ordering is grounded on the teacher's
//! `PrioritizedPlugin` max-heap (`plugin_system/registry.rs`): a
//! `BinaryHeap` ordered by priority, ties broken by insertion order via an
//! explicit sequence counter (a `BinaryHeap` alone has no notion of FIFO).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{oneshot, Mutex, Notify};

use crate::hooks::{event_keys, EmitOptions, HookBus};

/// A lightweight, clonable cancellation signal. Checked cooperatively by
/// long-running primitives (delays, actions, loop bodies, subflow calls)
/// per the concurrency model's cancellation contract.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. If already cancelled,
    /// resolves immediately.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub priority: i32,
    pub timeout: Option<Duration>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), priority: 0, timeout: None }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

struct Waiting {
    priority: i32,
    sequence: u64,
    ready: oneshot::Sender<()>,
}

impl PartialEq for Waiting {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for Waiting {}

impl Ord for Waiting {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; among equal priorities, the lower
        // sequence (earlier submission) ranks higher so FIFO holds.
        self.priority.cmp(&other.priority).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for Waiting {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    in_flight: usize,
    heap: BinaryHeap<Waiting>,
}

/// A bounded-concurrency scheduler. Construct once and share via `Arc`.
pub struct TaskManager {
    max_in_flight: usize,
    inner: Mutex<Inner>,
    sequence: AtomicU64,
    hooks: Option<Arc<HookBus>>,
}

impl TaskManager {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            inner: Mutex::new(Inner { in_flight: 0, heap: BinaryHeap::new() }),
            sequence: AtomicU64::new(0),
            hooks: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookBus>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    async fn emit(&self, event: &str, task_name: &str) {
        if let Some(hooks) = &self.hooks {
            hooks.emit(event, json!({ "task": task_name }), EmitOptions::default()).await;
        }
    }

    /// Wait for a free slot, respecting priority order, then run `fut` to
    /// completion (or until it times out / is cancelled). Emits
    /// `task:started`/`task:completed`/`task:failed`/`task:cancelled`.
    pub async fn run<F, T>(&self, spec: TaskSpec, cancellation: CancellationToken, fut: F) -> TaskOutcome<T>
    where
        F: Future<Output = T> + Send,
    {
        self.acquire_slot(spec.priority).await;
        self.emit(event_keys::TASK_STARTED, &spec.name).await;

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => TaskOutcome::Cancelled,
            result = Self::run_with_timeout(fut, spec.timeout) => result,
        };

        match &outcome {
            TaskOutcome::Completed(_) => self.emit(event_keys::TASK_COMPLETED, &spec.name).await,
            TaskOutcome::TimedOut => self.emit(event_keys::TASK_FAILED, &spec.name).await,
            TaskOutcome::Cancelled => self.emit(event_keys::TASK_CANCELLED, &spec.name).await,
        }

        self.release_slot().await;
        outcome
    }

    async fn run_with_timeout<F, T>(fut: F, timeout: Option<Duration>) -> TaskOutcome<T>
    where
        F: Future<Output = T> + Send,
    {
        match timeout {
            Some(duration) => match tokio::time::timeout(duration, fut).await {
                Ok(value) => TaskOutcome::Completed(value),
                Err(_) => TaskOutcome::TimedOut,
            },
            None => TaskOutcome::Completed(fut.await),
        }
    }

    async fn acquire_slot(&self, priority: i32) {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().await;
            let sequence = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
            if inner.in_flight < self.max_in_flight && inner.heap.is_empty() {
                inner.in_flight += 1;
                let _ = tx.send(());
                return;
            }
            inner.heap.push(Waiting { priority, sequence, ready: tx });
            self.try_dispatch(&mut inner);
        }
        let _ = rx.await;
    }

    async fn release_slot(&self) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = inner.in_flight.saturating_sub(1);
        self.try_dispatch(&mut inner);
    }

    fn try_dispatch(&self, inner: &mut Inner) {
        while inner.in_flight < self.max_in_flight {
            let Some(waiting) = inner.heap.pop() else { break };
            inner.in_flight += 1;
            let _ = waiting.ready.send(());
        }
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.in_flight
    }
}
