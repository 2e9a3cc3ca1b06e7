//! Task Handles
//!
//! The caller-visible proxy for a task's eventual result. A handle is created in
//! the pending state at submission and transitions exactly once to completed,
//! failed, cancelled, or discarded; the executing worker is the sole writer and
//! the first write wins. Handles are cheap to clone and support many readers.
//!
//! Cancellation is a `CancellationToken` that task bodies may check cooperatively,
//! plus a best-effort abort of the execution task for preemption while it is
//! suspended in a wait.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::types::{TaskError, TaskId};

/// Type alias for the type-erased future driving one task's execution.
pub(crate) type BoxedRunFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Type alias for the deferred producer of a task's execution future. Invoking it
/// creates the future; a task whose producer is never invoked never runs.
pub(crate) type BoxedRun = Box<dyn FnOnce() -> BoxedRunFuture + Send>;

/// Control surface of a handle with the result type erased, used by the pool to
/// manage tasks it no longer knows the type of.
pub(crate) trait HandleCtl: Send + Sync {
    fn is_done(&self) -> bool;
    fn complete_cancelled(&self);
    fn complete_discarded(&self);
    fn token(&self) -> &CancellationToken;
    fn set_abort(&self, handle: AbortHandle);
    fn clear_abort(&self);
    /// Cancels the token and aborts the execution task if one is running.
    fn cancel_signal(&self);
}

enum HandleCell<T> {
    Pending,
    Done(Result<T, TaskError>),
}

pub(crate) struct HandleInner<T> {
    id: TaskId,
    cell: Mutex<HandleCell<T>>,
    done: Notify,
    token: CancellationToken,
    abort: Mutex<Option<AbortHandle>>,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl<T: Send + 'static> HandleInner<T> {
    fn new(id: TaskId) -> Arc<Self> {
        Arc::new(Self {
            id,
            cell: Mutex::new(HandleCell::Pending),
            done: Notify::new(),
            token: CancellationToken::new(),
            abort: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Records the task's outcome. Returns false (and changes nothing) if the
    /// handle was already resolved: there is exactly one effective writer.
    pub(crate) fn complete_with(&self, result: Result<T, TaskError>) -> bool {
        {
            let mut cell = self.cell.lock().unwrap();
            match &*cell {
                HandleCell::Done(_) => return false,
                HandleCell::Pending => *cell = HandleCell::Done(result),
            }
        }
        self.done.notify_waiters();
        let callbacks: Vec<_> = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for callback in callbacks {
            callback();
        }
        true
    }

    fn peek_result(&self) -> Option<Result<T, TaskError>>
    where
        T: Clone,
    {
        match &*self.cell.lock().unwrap() {
            HandleCell::Pending => None,
            HandleCell::Done(result) => Some(result.clone()),
        }
    }

    /// Registers a completion callback; runs it immediately if already resolved.
    fn add_callback(&self, callback: Box<dyn FnOnce() + Send>) {
        {
            let cell = self.cell.lock().unwrap();
            if matches!(&*cell, HandleCell::Pending) {
                self.callbacks.lock().unwrap().push(callback);
                return;
            }
        }
        callback();
    }
}

impl<T: Send + 'static> HandleCtl for HandleInner<T> {
    fn is_done(&self) -> bool {
        matches!(&*self.cell.lock().unwrap(), HandleCell::Done(_))
    }

    fn complete_cancelled(&self) {
        self.complete_with(Err(TaskError::Cancelled));
    }

    fn complete_discarded(&self) {
        self.complete_with(Err(TaskError::Discarded));
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn set_abort(&self, handle: AbortHandle) {
        *self.abort.lock().unwrap() = Some(handle);
    }

    fn clear_abort(&self) {
        *self.abort.lock().unwrap() = None;
    }

    fn cancel_signal(&self) {
        self.token.cancel();
        if let Some(abort) = self.abort.lock().unwrap().as_ref() {
            abort.abort();
        }
    }
}

/// Resolves the handle if the execution future is dropped without reporting:
/// as cancelled when the token was signalled (abort landed), as a failure
/// otherwise (the task body panicked).
struct CompletionGuard<T: Send + 'static> {
    inner: Arc<HandleInner<T>>,
    armed: bool,
}

impl<T: Send + 'static> CompletionGuard<T> {
    fn new(inner: Arc<HandleInner<T>>) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T: Send + 'static> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.inner.token.is_cancelled() {
            self.inner.complete_with(Err(TaskError::Cancelled));
        } else {
            self.inner.complete_with(Err(TaskError::Failed(Arc::new(
                anyhow::anyhow!("task panicked before completing"),
            ))));
        }
    }
}

/// The caller-visible proxy for a task's eventual result, status, and
/// cancellation control.
pub struct TaskHandle<T> {
    inner: Arc<HandleInner<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Builds a pending handle plus the type-erased runner that executes `task`
    /// and reports its outcome. The runner contains a drop guard, so a started
    /// execution always resolves the handle even across a panic or an abort.
    pub(crate) fn bind<F>(id: TaskId, task: F) -> (Self, BoxedRun)
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::bind_lazy(id, move |_token| task)
    }

    /// Like `bind`, but the task body is built at execution time and receives
    /// the handle's cancellation token for cooperative checks.
    pub(crate) fn bind_lazy<F, Fut>(id: TaskId, task: F) -> (Self, BoxedRun)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let inner = HandleInner::new(id);
        let run_inner = inner.clone();
        let run: BoxedRun = Box::new(move || {
            let token = run_inner.token.clone();
            Box::pin(async move {
                let mut guard = CompletionGuard::new(run_inner.clone());
                match task(token).await {
                    Ok(value) => {
                        run_inner.complete_with(Ok(value));
                    }
                    Err(err) => {
                        tracing::warn!("Task {} failed: {:#}", run_inner.id, err);
                        run_inner.complete_with(Err(TaskError::Failed(Arc::new(err))));
                    }
                }
                guard.disarm();
            }) as BoxedRunFuture
        });
        (Self { inner }, run)
    }

    pub(crate) fn ctl(&self) -> Arc<dyn HandleCtl> {
        self.inner.clone()
    }

    /// The identifier assigned to this task at submission.
    pub fn id(&self) -> &TaskId {
        &self.inner.id
    }

    /// True once the handle has resolved, whatever the outcome.
    pub fn is_done(&self) -> bool {
        HandleCtl::is_done(&*self.inner)
    }

    /// True if the handle resolved to `TaskError::Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.inner.cell.lock().unwrap(),
            HandleCell::Done(Err(TaskError::Cancelled))
        )
    }

    /// The task's cancellation token, for cooperative checks inside the task body.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Cancels the task. Returns false if it had already resolved.
    ///
    /// A task that has not started yet is guaranteed never to execute. A running
    /// task sees its token cancelled and, when `interrupt_if_running` is set, its
    /// execution is additionally aborted at the next suspension point; either way
    /// this handle reports `TaskError::Cancelled` from now on.
    pub fn cancel(&self, interrupt_if_running: bool) -> bool {
        self.inner.token.cancel();
        if !self.inner.complete_with(Err(TaskError::Cancelled)) {
            return false;
        }
        if interrupt_if_running {
            if let Some(abort) = self.inner.abort.lock().unwrap().as_ref() {
                abort.abort();
            }
        }
        tracing::debug!("Task {} cancelled", self.inner.id);
        true
    }

    /// Waits for the task to resolve and returns its outcome.
    pub async fn get(&self) -> Result<T, TaskError>
    where
        T: Clone,
    {
        loop {
            let notified = self.inner.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(result) = self.inner.peek_result() {
                return result;
            }
            notified.await;
        }
    }

    /// Waits up to `timeout` for the task to resolve. On expiry the handle is
    /// untouched and `TaskError::Timeout` is returned; the wait may be retried.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError>
    where
        T: Clone,
    {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::Timeout),
        }
    }

    /// Registers a continuation invoked once with the task's outcome. Runs
    /// immediately if the task has already resolved; otherwise runs on the
    /// completing context.
    pub fn on_done<F>(&self, callback: F)
    where
        T: Clone,
        F: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner.add_callback(Box::new(move || {
            if let Some(result) = inner.peek_result() {
                callback(result);
            }
        }));
    }

    /// Chains a continuation producing a new handle, the combinator layer atop
    /// the basic handle primitive.
    ///
    /// The continuation is spawned on the runtime when the source resolves; it
    /// never occupies a pool worker, so chaining cannot deadlock a small pool.
    /// Requires a live tokio runtime at completion time.
    pub fn then<U, F, Fut>(&self, continuation: F) -> TaskHandle<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(Result<T, TaskError>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        let child_inner = HandleInner::new(TaskId::new());
        let child = TaskHandle {
            inner: child_inner.clone(),
        };
        self.on_done(move |result| {
            tokio::spawn(async move {
                let mut guard = CompletionGuard::new(child_inner.clone());
                match continuation(result).await {
                    Ok(value) => {
                        child_inner.complete_with(Ok(value));
                    }
                    Err(err) => {
                        child_inner
                            .complete_with(Err(TaskError::Failed(Arc::new(err))));
                    }
                }
                guard.disarm();
            });
        });
        child
    }
}

/// A task drained from the queue by a forced shutdown, never started.
///
/// The caller may `run` it (resolving the original handle as if a worker had
/// executed it) or persist its id and drop it, which resolves the handle as
/// cancelled so readers never hang.
pub struct AbandonedTask {
    id: TaskId,
    submitted_at: u64,
    work: Option<BoxedRun>,
    ctl: Arc<dyn HandleCtl>,
}

impl AbandonedTask {
    pub(crate) fn new(
        id: TaskId,
        submitted_at: u64,
        work: BoxedRun,
        ctl: Arc<dyn HandleCtl>,
    ) -> Self {
        Self {
            id,
            submitted_at,
            work: Some(work),
            ctl,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Timestamp (ms) when the task was originally admitted.
    pub fn submitted_at(&self) -> u64 {
        self.submitted_at
    }

    /// Executes the abandoned task on the calling context, completing the
    /// original handle. A no-op if the handle has resolved in the meantime.
    pub async fn run(mut self) {
        if let Some(work) = self.work.take() {
            if self.ctl.is_done() {
                return;
            }
            work().await;
        }
    }
}

impl Drop for AbandonedTask {
    fn drop(&mut self) {
        if self.work.is_some() {
            self.ctl.complete_cancelled();
        }
    }
}

impl std::fmt::Debug for AbandonedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbandonedTask")
            .field("id", &self.id)
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}
