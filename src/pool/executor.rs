//! Worker Pool Implementation
//!
//! Manages the lifecycle of task execution: admission and dispatch, the worker
//! execution loop, and the shutdown state machine.
//!
//! ## Responsibilities
//! - **Admission**: deciding, atomically against other submissions and worker
//!   spawn/retire events, whether a task seeds a new worker, enters the queue,
//!   or falls through to the overload policy.
//! - **Execution**: running each task body under a spawned task so failures and
//!   panics are captured on the task's handle and never crash a worker.
//! - **Lifecycle**: graceful drain (`shutdown`), forced stop (`shutdown_now`),
//!   and termination tracking (`await_termination`).

use super::handle::{AbandonedTask, BoxedRun, HandleCtl, TaskHandle};
use super::queue::{QueuedTask, TaskQueue};
use super::types::*;

use anyhow::Result;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// State guarded by the admission mutex. Every admission decision, queue
/// mutation, worker spawn/retire, and state transition goes through here, so two
/// submissions can never both observe the last free worker slot.
struct PoolCore {
    state: PoolState,
    queue: TaskQueue,
    /// Alive workers, core and overflow.
    workers: usize,
    /// Workers currently parked waiting for work. Consulted by direct handoff.
    idle: usize,
    /// Monotone submission counter; the FIFO tie-breaker for priority queues.
    next_seq: u64,
}

/// What the admission decision told the submitter to do, resolved outside the
/// lock so no user-visible completion runs with the admission mutex held.
enum Admitted {
    /// Spawn a worker; `seed: None` means the task was queued but the pool had
    /// no workers left to drain it, so an unseeded worker starts at the queue.
    Spawn {
        seed: Option<QueuedTask>,
        core_worker: bool,
    },
    Queued,
    QueuedEvicting { victim: QueuedTask },
    Inline(QueuedTask),
    Discard(QueuedTask),
}

struct AdmitFailure {
    reason: Rejected,
    victim: Option<QueuedTask>,
}

/// The engine that drives task execution.
pub struct WorkerPool {
    cfg: PoolConfig,
    /// Self-reference handed to spawned workers; the pool is only ever reachable
    /// through an `Arc`.
    me: Weak<WorkerPool>,
    core: Mutex<PoolCore>,
    /// Wakes one parked worker per enqueued task, all of them on shutdown.
    work_available: Notify,
    /// Wakes `await_termination` callers when the pool reaches `Terminated`.
    termination: Notify,
    /// Control surfaces of tasks currently executing, for forced shutdown.
    in_flight: DashMap<TaskId, Arc<dyn HandleCtl>>,
    active: AtomicUsize,
    completed: AtomicU64,
    next_worker_id: AtomicU64,
}

impl WorkerPool {
    /// Creates a new pool and validates its configuration.
    pub fn new(cfg: PoolConfig) -> Result<Arc<Self>> {
        if cfg.max_size == 0 {
            anyhow::bail!("max_size must be at least 1");
        }
        if cfg.core_size > cfg.max_size {
            anyhow::bail!(
                "core_size ({}) must not exceed max_size ({})",
                cfg.core_size,
                cfg.max_size
            );
        }
        if let QueueKind::Bounded { capacity } = cfg.queue {
            if capacity == 0 {
                anyhow::bail!("bounded queue capacity must be non-zero; use DirectHandoff");
            }
        }

        tracing::info!(
            "Starting worker pool (core: {}, max: {}, queue: {:?}, policy: {:?})",
            cfg.core_size,
            cfg.max_size,
            cfg.queue,
            cfg.overload_policy
        );

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            core: Mutex::new(PoolCore {
                state: PoolState::Running,
                queue: TaskQueue::new(cfg.queue),
                workers: 0,
                idle: 0,
                next_seq: 0,
            }),
            cfg,
            work_available: Notify::new(),
            termination: Notify::new(),
            in_flight: DashMap::new(),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            next_worker_id: AtomicU64::new(0),
        }))
    }

    /// Fixed-size pool: `size` persistent workers over an unbounded FIFO queue.
    pub fn fixed(size: usize) -> Result<Arc<Self>> {
        Self::new(PoolConfig::new(size, size))
    }

    /// Single persistent worker over an unbounded FIFO queue; tasks execute
    /// strictly in submission order.
    pub fn single() -> Result<Arc<Self>> {
        Self::fixed(1)
    }

    /// Elastic pool: no core workers, direct handoff, a worker spawned per task
    /// when none is idle, each retiring after 60s of idleness.
    pub fn cached() -> Result<Arc<Self>> {
        Self::new(
            PoolConfig::new(0, usize::MAX)
                .with_queue(QueueKind::DirectHandoff)
                .with_idle_timeout(Duration::from_secs(60)),
        )
    }

    // ------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------

    /// Submits a task for execution and returns its handle.
    ///
    /// The task is a future resolving to `anyhow::Result<T>`; an `Err` is
    /// captured on the handle as `TaskError::Failed`. Fails synchronously with
    /// `Rejected` when the pool is shut down or saturated under the `Reject`
    /// policy.
    pub async fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, Rejected>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.submit_inner(0, task).await
    }

    /// Like `submit`, with an explicit priority consulted by `QueueKind::Priority`
    /// (higher value dequeues first). Other queue kinds ignore the priority.
    pub async fn submit_with_priority<T, F>(
        &self,
        priority: i64,
        task: F,
    ) -> Result<TaskHandle<T>, Rejected>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.submit_inner(priority, task).await
    }

    /// Like `submit`, but hands the task body its own cancellation token for
    /// cooperative cancellation checks.
    pub async fn submit_with_token<T, F, Fut>(
        &self,
        task: F,
    ) -> Result<TaskHandle<T>, Rejected>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = TaskId::new();
        let (handle, run) = TaskHandle::bind_lazy(id.clone(), task);
        self.dispatch(id, 0, handle, run).await
    }

    async fn submit_inner<T, F>(
        &self,
        priority: i64,
        task: F,
    ) -> Result<TaskHandle<T>, Rejected>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let id = TaskId::new();
        let (handle, run) = TaskHandle::bind(id.clone(), task);
        self.dispatch(id, priority, handle, run).await
    }

    async fn dispatch<T>(
        &self,
        id: TaskId,
        priority: i64,
        handle: TaskHandle<T>,
        run: BoxedRun,
    ) -> Result<TaskHandle<T>, Rejected>
    where
        T: Send + 'static,
    {
        let task = QueuedTask {
            id,
            seq: 0, // assigned under the admission lock
            priority,
            submitted_at: now_ms(),
            run,
            ctl: handle.ctl(),
        };

        match self.admit(task) {
            Err(failure) => {
                if let Some(victim) = failure.victim {
                    self.resolve_discarded(victim);
                }
                Err(failure.reason)
            }
            Ok(Admitted::Queued) => {
                self.work_available.notify_one();
                Ok(handle)
            }
            Ok(Admitted::QueuedEvicting { victim }) => {
                self.resolve_discarded(victim);
                self.work_available.notify_one();
                Ok(handle)
            }
            Ok(Admitted::Spawn { seed, core_worker }) => {
                self.spawn_worker(seed, core_worker);
                Ok(handle)
            }
            Ok(Admitted::Inline(task)) => {
                tracing::debug!("Pool saturated, running task {} inline", task.id);
                self.run_task(task).await;
                Ok(handle)
            }
            Ok(Admitted::Discard(task)) => {
                self.resolve_discarded(task);
                Ok(handle)
            }
        }
    }

    /// The admission decision sequence, evaluated atomically with respect to
    /// pool state: core spawn, then queue, then overflow spawn, then policy.
    /// This order gives the bounded-queue configuration its absorb-then-burst-
    /// then-shed behavior under load.
    fn admit(&self, mut task: QueuedTask) -> Result<Admitted, AdmitFailure> {
        let mut core = self.core.lock().unwrap();

        if core.state != PoolState::Running {
            return Err(AdmitFailure {
                reason: Rejected::ShutDown,
                victim: None,
            });
        }

        core.next_seq += 1;
        task.seq = core.next_seq;

        if core.workers < self.cfg.core_size {
            core.workers += 1;
            return Ok(Admitted::Spawn {
                seed: Some(task),
                core_worker: true,
            });
        }

        let idle = core.idle;
        match core.queue.offer(task, idle) {
            Ok(()) => {
                // Double-check after queueing: with core_size 0 every worker may
                // have retired, leaving nobody to drain the queue.
                if core.workers == 0 {
                    core.workers += 1;
                    return Ok(Admitted::Spawn {
                        seed: None,
                        core_worker: false,
                    });
                }
                return Ok(Admitted::Queued);
            }
            Err(task) => {
                if core.workers < self.cfg.max_size {
                    core.workers += 1;
                    return Ok(Admitted::Spawn {
                        seed: Some(task),
                        core_worker: false,
                    });
                }

                match self.cfg.overload_policy {
                    OverloadPolicy::Reject => Err(AdmitFailure {
                        reason: Rejected::Overloaded,
                        victim: None,
                    }),
                    OverloadPolicy::RunInline => Ok(Admitted::Inline(task)),
                    OverloadPolicy::Discard => Ok(Admitted::Discard(task)),
                    OverloadPolicy::DiscardOldest => match core.queue.evict_oldest() {
                        Some(victim) => match core.queue.offer(task, idle) {
                            Ok(()) => Ok(Admitted::QueuedEvicting { victim }),
                            Err(_task) => Err(AdmitFailure {
                                reason: Rejected::Overloaded,
                                victim: Some(victim),
                            }),
                        },
                        None => Err(AdmitFailure {
                            reason: Rejected::Overloaded,
                            victim: None,
                        }),
                    },
                }
            }
        }
    }

    fn resolve_discarded(&self, task: QueuedTask) {
        tracing::warn!(
            "Task {} discarded by overload policy ({}ms after submission)",
            task.id,
            now_ms().saturating_sub(task.submitted_at)
        );
        task.ctl.complete_discarded();
    }

    // ------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------

    fn spawn_worker(&self, seed: Option<QueuedTask>, core_worker: bool) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let pool = self
            .me
            .upgrade()
            .expect("pool is only reachable through an Arc");
        tokio::spawn(async move {
            pool.worker_loop(worker_id, core_worker, seed).await;
        });
    }

    /// The main loop for a single worker: execute the seeded task (if any), then
    /// pull from the queue until retirement or shutdown.
    async fn worker_loop(self: Arc<Self>, worker_id: u64, core_worker: bool, seed: Option<QueuedTask>) {
        tracing::debug!(
            "Worker {} started ({})",
            worker_id,
            if core_worker { "core" } else { "overflow" }
        );

        let mut next = match seed {
            Some(task) => Some(task),
            None => self.next_task(core_worker).await,
        };
        while let Some(task) = next.take() {
            self.run_task(task).await;
            next = self.next_task(core_worker).await;
        }

        tracing::debug!("Worker {} exited", worker_id);
    }

    /// Pulls the next task, parking until work arrives. Overflow workers (and
    /// core workers when `core_idle_timeout` is set) give up after their idle
    /// timeout; retirement re-checks the queue under the admission mutex so it
    /// cannot race a submission that already counted this worker as idle.
    ///
    /// Returns `None` when the worker should exit.
    async fn next_task(&self, core_worker: bool) -> Option<QueuedTask> {
        let idle_limit = if core_worker {
            self.cfg.core_idle_timeout
        } else {
            Some(self.cfg.idle_timeout)
        };

        loop {
            let notified = self.work_available.notified();
            tokio::pin!(notified);
            {
                let mut core = self.core.lock().unwrap();
                if let Some(task) = core.queue.pop() {
                    // Cascade the wakeup so one notify per enqueue never strands
                    // a second queued task behind a single stored permit.
                    if !core.queue.is_empty() {
                        self.work_available.notify_one();
                    }
                    return Some(task);
                }
                if core.state != PoolState::Running {
                    self.exit_worker(core);
                    return None;
                }
                core.idle += 1;
                // Register interest before releasing the lock; a notify issued
                // between unlock and await would otherwise be lost.
                notified.as_mut().enable();
            }

            let woke = match idle_limit {
                None => {
                    notified.await;
                    true
                }
                Some(limit) => tokio::time::timeout(limit, notified).await.is_ok(),
            };

            let mut core = self.core.lock().unwrap();
            core.idle -= 1;
            if !woke && core.queue.is_empty() {
                // Idle timeout with nothing to do: retire. The decrement happens
                // under the same lock that saw the queue empty, so a submission
                // can never enqueue against a worker that is already gone.
                self.exit_worker(core);
                return None;
            }
        }
    }

    /// Worker exit bookkeeping. Takes the guard that observed the exit condition
    /// so the count and the condition stay consistent.
    fn exit_worker(&self, mut core: std::sync::MutexGuard<'_, PoolCore>) {
        core.workers -= 1;
        let finished = core.workers == 0
            && core.queue.is_empty()
            && matches!(core.state, PoolState::ShuttingDown | PoolState::Stopped);
        if finished {
            core.state = PoolState::Terminated;
        }
        drop(core);

        if finished {
            tracing::info!("Worker pool terminated");
            self.termination.notify_waiters();
        }
    }

    /// Executes one task, containing its failure modes.
    ///
    /// The body runs under a spawned task whose abort handle doubles as the
    /// best-effort preemption signal; a panic or abort resolves the handle via
    /// its drop guard instead of unwinding into the worker.
    async fn run_task(&self, task: QueuedTask) {
        let QueuedTask { id, run, ctl, .. } = task;

        if ctl.is_done() {
            tracing::debug!("Task {} resolved before start, skipping", id);
            return;
        }
        if ctl.token().is_cancelled() {
            ctl.complete_cancelled();
            tracing::debug!("Task {} token cancelled before start, skipping", id);
            return;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        self.in_flight.insert(id.clone(), ctl.clone());

        // A forced shutdown that ran before this task was registered in-flight
        // could not signal it; the state check closes that window.
        if self.state() == PoolState::Stopped {
            self.in_flight.remove(&id);
            self.active.fetch_sub(1, Ordering::SeqCst);
            ctl.complete_cancelled();
            tracing::debug!("Task {} cancelled by forced shutdown before start", id);
            return;
        }

        let execution = tokio::spawn(run());
        ctl.set_abort(execution.abort_handle());
        // A cancellation that landed between spawn and abort registration missed
        // its preemption; deliver it now.
        if ctl.token().is_cancelled() {
            execution.abort();
        }

        match execution.await {
            Ok(()) => {}
            Err(join_err) if join_err.is_panic() => {
                tracing::error!("Task {} panicked: {}", id, join_err);
            }
            Err(_) => {
                tracing::debug!("Task {} execution aborted", id);
            }
        }

        ctl.clear_abort();
        self.in_flight.remove(&id);
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    // ------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------

    /// Graceful shutdown: stops accepting submissions; queued and in-flight
    /// tasks run to completion. Idempotent.
    pub fn shutdown(&self) {
        let finished = {
            let mut core = self.core.lock().unwrap();
            if core.state != PoolState::Running {
                return;
            }
            core.state = PoolState::ShuttingDown;
            if core.workers == 0 && core.queue.is_empty() {
                core.state = PoolState::Terminated;
                true
            } else {
                false
            }
        };

        tracing::info!("Worker pool shutting down");
        self.work_available.notify_waiters();
        if finished {
            self.termination.notify_waiters();
        }
    }

    /// Forced shutdown: signals cancellation to every in-flight task (token plus
    /// execution abort) and drains the queue, returning the never-started tasks
    /// so the caller may persist or retry them.
    ///
    /// Already-running tasks are not guaranteed to stop; they only receive the
    /// cancellation signal.
    pub fn shutdown_now(&self) -> Vec<AbandonedTask> {
        let (drained, finished) = {
            let mut core = self.core.lock().unwrap();
            match core.state {
                PoolState::Running | PoolState::ShuttingDown => {
                    core.state = PoolState::Stopped;
                }
                PoolState::Stopped | PoolState::Terminated => return Vec::new(),
            }
            let drained = core.queue.drain();
            let finished = core.workers == 0;
            if finished {
                core.state = PoolState::Terminated;
            }
            (drained, finished)
        };

        tracing::info!(
            "Worker pool stopped, abandoning {} queued task(s)",
            drained.len()
        );

        self.work_available.notify_waiters();
        for entry in self.in_flight.iter() {
            entry.value().cancel_signal();
        }
        if finished {
            self.termination.notify_waiters();
        }

        drained
            .into_iter()
            .map(|task| AbandonedTask::new(task.id, task.submitted_at, task.run, task.ctl))
            .collect()
    }

    /// Blocks the calling context until the pool is terminated or the timeout
    /// elapses. Returns true if termination was reached.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.termination.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state() == PoolState::Terminated {
                return true;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.state() == PoolState::Terminated;
            }
        }
    }

    // ------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------

    pub fn state(&self) -> PoolState {
        self.core.lock().unwrap().state
    }

    /// Number of alive workers, core and overflow.
    pub fn pool_size(&self) -> usize {
        self.core.lock().unwrap().workers
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of admitted-but-undispatched tasks.
    pub fn queued_count(&self) -> usize {
        self.core.lock().unwrap().queue.len()
    }

    /// Number of tasks whose execution has finished, successfully or not.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Point-in-time snapshot of the pool's observable state.
    pub fn stats(&self) -> PoolStats {
        let core = self.core.lock().unwrap();
        PoolStats {
            state: core.state,
            pool_size: core.workers,
            active_count: self.active.load(Ordering::SeqCst),
            queued_count: core.queue.len(),
            completed_count: self.completed.load(Ordering::SeqCst),
        }
    }
}
