//! Task Holding Area
//!
//! Implements the four interchangeable queue strategies behind a single type:
//! bounded FIFO, unbounded FIFO, direct handoff, and priority order.
//!
//! The queue is a plain value owned by the pool and mutated only under the pool's
//! admission mutex; worker-side waiting lives in the executor, not here. `offer`
//! and `pop` are therefore non-blocking by construction.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use super::handle::{BoxedRun, HandleCtl};
use super::types::{QueueKind, TaskId};

/// An admitted task waiting for (or seeded into) a worker.
pub(crate) struct QueuedTask {
    pub id: TaskId,
    /// Monotone submission sequence number; the FIFO tie-breaker.
    pub seq: u64,
    /// Submission priority; only consulted by `QueueKind::Priority`.
    pub priority: i64,
    /// Timestamp (ms) when the task was admitted.
    pub submitted_at: u64,
    /// Type-erased closure producing the execution future.
    pub run: BoxedRun,
    /// Type-erased control surface of the task's handle.
    pub ctl: Arc<dyn HandleCtl>,
}

/// Heap entry ordering: higher priority first, then lower sequence (earlier
/// arrival) first.
struct RankedTask(QueuedTask);

impl PartialEq for RankedTask {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for RankedTask {}

impl PartialOrd for RankedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

enum Store {
    Fifo(VecDeque<QueuedTask>),
    Ranked(BinaryHeap<RankedTask>),
}

/// The holding area for admitted-but-undispatched tasks.
pub(crate) struct TaskQueue {
    store: Store,
    /// `None` = unbounded, `Some(0)` = direct handoff.
    capacity: Option<usize>,
}

impl TaskQueue {
    pub fn new(kind: QueueKind) -> Self {
        let (store, capacity) = match kind {
            QueueKind::DirectHandoff => (Store::Fifo(VecDeque::new()), Some(0)),
            QueueKind::Bounded { capacity } => {
                (Store::Fifo(VecDeque::with_capacity(capacity)), Some(capacity))
            }
            QueueKind::Unbounded => (Store::Fifo(VecDeque::new()), None),
            QueueKind::Priority => (Store::Ranked(BinaryHeap::new()), None),
        };
        Self { store, capacity }
    }

    /// Attempts to accept a task without blocking. Returns the task back to the
    /// caller when refused.
    ///
    /// For a direct-handoff queue, acceptance requires a parked worker beyond the
    /// handoffs already sitting unclaimed, so a task never waits in a zero-capacity
    /// queue without a worker committed to picking it up.
    pub fn offer(&mut self, task: QueuedTask, idle_workers: usize) -> Result<(), QueuedTask> {
        let accepts = match self.capacity {
            Some(0) => idle_workers > self.len(),
            Some(cap) => self.len() < cap,
            None => true,
        };
        if accepts {
            self.push(task);
            Ok(())
        } else {
            Err(task)
        }
    }

    fn push(&mut self, task: QueuedTask) {
        match &mut self.store {
            Store::Fifo(deque) => deque.push_back(task),
            Store::Ranked(heap) => heap.push(RankedTask(task)),
        }
    }

    /// Removes the next task in the queue's dispatch order.
    pub fn pop(&mut self) -> Option<QueuedTask> {
        match &mut self.store {
            Store::Fifo(deque) => deque.pop_front(),
            Store::Ranked(heap) => heap.pop().map(|ranked| ranked.0),
        }
    }

    /// Removes the oldest task by arrival order, regardless of priority.
    /// Used by the `DiscardOldest` overload policy.
    pub fn evict_oldest(&mut self) -> Option<QueuedTask> {
        match &mut self.store {
            Store::Fifo(deque) => deque.pop_front(),
            Store::Ranked(heap) => {
                let mut entries = std::mem::take(heap).into_vec();
                let oldest = entries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, ranked)| ranked.0.seq)
                    .map(|(index, _)| index);
                let victim = oldest.map(|index| entries.swap_remove(index).0);
                *heap = BinaryHeap::from(entries);
                victim
            }
        }
    }

    /// Empties the queue, returning the tasks in arrival order.
    pub fn drain(&mut self) -> Vec<QueuedTask> {
        match &mut self.store {
            Store::Fifo(deque) => deque.drain(..).collect(),
            Store::Ranked(heap) => {
                let mut entries: Vec<QueuedTask> =
                    std::mem::take(heap).into_vec().into_iter().map(|r| r.0).collect();
                entries.sort_by_key(|task| task.seq);
                entries
            }
        }
    }

    pub fn len(&self) -> usize {
        match &self.store {
            Store::Fifo(deque) => deque.len(),
            Store::Ranked(heap) => heap.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
