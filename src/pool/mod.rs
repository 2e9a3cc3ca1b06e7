//! Worker Pool Executor Module
//!
//! This module implements a bounded worker-pool task executor: an engine that accepts
//! tasks, enqueues or dispatches them according to capacity rules, executes them on
//! pooled workers, and exposes lifecycle control and introspection.
//!
//! ## Architecture Overview
//! The pool follows a **core / queue / overflow** admission model:
//! 1. **Core workers**: while fewer than `core_size` workers are alive, each submission
//!    spawns a new persistent worker seeded with that task.
//! 2. **Queueing**: once the core is saturated, tasks are placed into the configured
//!    queue (bounded, unbounded, direct-handoff, or priority-ordered).
//! 3. **Overflow workers**: when the queue refuses a task, extra workers are spawned
//!    up to `max_size`; these retire after sitting idle for `idle_timeout`.
//! 4. **Overload policy**: when neither queueing nor spawning is possible, the
//!    configured policy decides whether to reject, run inline, or discard.
//!
//! All admission decisions, worker spawn/retire events, and lifecycle transitions
//! serialize through one mutex, so two submissions can never both claim the last
//! worker slot.
//!
//! ## Submodules
//! - **`types`**: Identifiers, configuration, lifecycle states, error taxonomy, and
//!   the introspection snapshot DTO.
//! - **`queue`**: The holding area for admitted-but-undispatched tasks, in its four
//!   interchangeable flavors.
//! - **`handle`**: The caller-visible proxy for a task's eventual result, status,
//!   cancellation control, and completion continuations.
//! - **`executor`**: The pool itself: admission, the worker execution loop, and the
//!   shutdown state machine.

pub mod types;
pub mod queue;
pub mod handle;
pub mod executor;
