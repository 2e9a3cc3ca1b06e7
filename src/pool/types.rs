use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a submitted task.
///
/// Wrapper around a UUID string to ensure uniqueness across the lifetime of the
/// pool. Returned inside handles and abandoned-task lists so callers can correlate
/// log lines with submissions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the lifecycle state of the pool.
///
/// Transitions are monotone: `Running -> ShuttingDown -> Terminated` for a graceful
/// shutdown, `Running | ShuttingDown -> Stopped -> Terminated` for a forced one.
/// Once `Terminated` is reached the pool never leaves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions and executing tasks.
    Running,
    /// Graceful shutdown requested: no new submissions, queued and in-flight
    /// tasks run to completion.
    ShuttingDown,
    /// Forced shutdown requested: queue drained, in-flight tasks signalled.
    Stopped,
    /// All workers have exited and the queue is empty. Final state.
    Terminated,
}

/// The holding strategy for admitted-but-undispatched tasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueKind {
    /// Zero-capacity rendezvous: a task is only accepted if an idle worker is
    /// already parked and ready to receive it.
    DirectHandoff,
    /// FIFO with a fixed capacity; refuses tasks when full.
    Bounded { capacity: usize },
    /// FIFO that never refuses a task. Known risk, not a bug: sustained overload
    /// grows this queue without bound.
    Unbounded,
    /// Ordered by submission priority (higher value dequeues first), ties broken
    /// by arrival order. Never refuses a task, like the unbounded FIFO.
    Priority,
}

/// The strategy invoked when a task can be neither dispatched nor queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OverloadPolicy {
    /// Fail the submission with `Rejected::Overloaded`.
    Reject,
    /// Execute the task synchronously on the submitting context, returning only
    /// after completion. Applies backpressure to the submitter.
    RunInline,
    /// Drop the task. The submission succeeds and its handle resolves to
    /// `TaskError::Discarded`.
    Discard,
    /// Evict the oldest queued task (its handle resolves to `TaskError::Discarded`),
    /// then enqueue the new task; if the queue is still full, fail.
    DiscardOldest,
}

/// Pool construction parameters.
///
/// `idle_timeout` governs overflow workers only; core workers wait for work
/// indefinitely unless `core_idle_timeout` is set. The two knobs are deliberately
/// independent.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of persistent workers.
    pub core_size: usize,
    /// Hard cap on simultaneous workers. Must be at least 1 and at least `core_size`.
    pub max_size: usize,
    /// How long an overflow worker may sit idle before retiring.
    pub idle_timeout: Duration,
    /// If set, core workers also retire after this idle duration.
    pub core_idle_timeout: Option<Duration>,
    /// Queue strategy for admitted-but-undispatched tasks.
    pub queue: QueueKind,
    /// Behavior when a task can be neither dispatched nor queued.
    pub overload_policy: OverloadPolicy,
}

impl PoolConfig {
    /// Creates a configuration with the given core and maximum sizes and the
    /// defaults: unbounded FIFO queue, `Reject` overload policy, 60s overflow idle
    /// timeout, core workers never retiring.
    pub fn new(core_size: usize, max_size: usize) -> Self {
        Self {
            core_size,
            max_size,
            idle_timeout: Duration::from_secs(60),
            core_idle_timeout: None,
            queue: QueueKind::Unbounded,
            overload_policy: OverloadPolicy::Reject,
        }
    }

    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_overload_policy(mut self, policy: OverloadPolicy) -> Self {
        self.overload_policy = policy;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Allows core workers to retire after the given idle duration.
    pub fn with_core_idle_timeout(mut self, timeout: Duration) -> Self {
        self.core_idle_timeout = Some(timeout);
        self
    }
}

/// Point-in-time snapshot of the pool's observable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub state: PoolState,
    /// Number of alive workers (core and overflow).
    pub pool_size: usize,
    /// Number of tasks currently executing.
    pub active_count: usize,
    /// Number of admitted-but-undispatched tasks.
    pub queued_count: usize,
    /// Number of tasks whose execution has finished, successfully or not.
    pub completed_count: u64,
}

/// A submission was refused at call time.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Rejected {
    /// The pool is no longer accepting work.
    #[error("pool is shut down")]
    ShutDown,
    /// Workers and queue are saturated and the policy rejects.
    #[error("pool is saturated")]
    Overloaded,
}

/// The terminal failure of an individual task, surfaced through its handle.
///
/// Failure payloads are reference-counted so a handle's result stays cloneable
/// for multiple readers.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task's own logic returned an error.
    #[error("task failed: {0}")]
    Failed(Arc<anyhow::Error>),
    /// The handle was cancelled before or during execution.
    #[error("task was cancelled")]
    Cancelled,
    /// An overload policy dropped the task before it could run.
    #[error("task was discarded by overload policy")]
    Discarded,
    /// A bounded wait for the result expired. The task itself may still complete.
    #[error("timed out waiting for task result")]
    Timeout,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
