//! Scheduler Implementation
//!
//! Timer loops run as plain spawned tasks; each fire submits into the wrapped
//! pool. A schedule stops when its token is cancelled or when the pool rejects
//! a fire because it has shut down.

use crate::pool::executor::WorkerPool;
use crate::pool::types::Rejected;

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handle to a pending schedule.
///
/// Cancelling stops future firings; a run already submitted to the pool is not
/// recalled.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    token: CancellationToken,
}

impl ScheduledTask {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Timed submission facade over a worker pool.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<WorkerPool>,
}

impl Scheduler {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    /// Submits the task produced by `task` to the pool once, after `delay`.
    ///
    /// The producer runs at fire time, not at scheduling time. A rejection by
    /// the pool is logged and the run is lost; cancel the schedule instead of
    /// relying on rejection to stop it.
    pub fn schedule_once<F, Fut, T>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = loop_token.cancelled() => {
                    tracing::debug!("One-shot schedule cancelled before firing");
                }
                _ = tokio::time::sleep(delay) => {
                    match pool.submit(task()).await {
                        Ok(handle) => {
                            tracing::debug!("One-shot schedule fired task {}", handle.id());
                        }
                        Err(reason) => {
                            tracing::warn!("One-shot schedule rejected: {}", reason);
                        }
                    }
                }
            }
        });

        ScheduledTask { token }
    }

    /// Submits `task()` to the pool every `period`, starting after
    /// `initial_delay`, until the schedule is cancelled or the pool shuts down.
    ///
    /// A tick rejected because the pool is saturated is logged and skipped; the
    /// schedule keeps running.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) -> ScheduledTask
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = loop_token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        tracing::debug!("Fixed-rate schedule cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        match pool.submit(task()).await {
                            Ok(_) => {}
                            Err(Rejected::ShutDown) => {
                                tracing::info!("Pool shut down, stopping fixed-rate schedule");
                                break;
                            }
                            Err(Rejected::Overloaded) => {
                                tracing::warn!("Fixed-rate tick rejected by saturated pool, skipping");
                            }
                        }
                    }
                }
            }
        });

        ScheduledTask { token }
    }
}
