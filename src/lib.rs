//! Bounded Worker Pool Library
//!
//! This library crate implements a task-execution engine that owns a fixed set of
//! long-lived workers plus an elastic overflow capacity, a configurable task queue,
//! and a pluggable overload policy.
//!
//! ## Architecture Modules
//! The crate is composed of two loosely coupled subsystems:
//!
//! - **`pool`**: The worker-pool executor. It admits tasks according to capacity
//!   rules (core workers, then queue, then overflow workers, then overload policy),
//!   executes them on pooled workers, and exposes lifecycle control (graceful and
//!   forced shutdown) plus introspection (pool size, active count, queue depth,
//!   completed count).
//! - **`schedule`**: Timed execution built on top of the pool. Supports one-shot
//!   delayed submission and fixed-rate repeating submission, both cancellable.

pub mod pool;
pub mod schedule;
