//! Timed Execution Module
//!
//! Builds delayed and repeating submission on top of the worker pool: a one-shot
//! task submitted after a delay, and a fixed-rate task submitted every period
//! until cancelled or until the pool shuts down.
//!
//! The scheduler owns no workers of its own; at each fire time it submits into
//! the wrapped pool, so scheduled work competes with ordinary submissions under
//! the same admission rules.
//!
//! ## Submodules
//! - **`scheduler`**: The `Scheduler` facade and the cancellable `ScheduledTask`
//!   handle for pending schedules.

pub mod scheduler;

#[cfg(test)]
mod tests;
