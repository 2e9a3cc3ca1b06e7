//! Schedule Module Tests
//!
//! Validates one-shot delayed submission, cancellation, and fixed-rate
//! repetition against a real pool with real timers.

#[cfg(test)]
mod tests {
    use crate::pool::executor::WorkerPool;
    use crate::schedule::scheduler::Scheduler;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // ============================================================
    // TEST 1: One-shot scheduling
    // ============================================================

    #[tokio::test]
    async fn test_schedule_once_fires_after_delay() {
        // ARRANGE
        let pool = WorkerPool::fixed(1).unwrap();
        let scheduler = Scheduler::new(pool.clone());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        // ACT
        scheduler.schedule_once(Duration::from_millis(150), move || async move {
            fired_clone.store(true, Ordering::SeqCst);
            Ok(())
        });

        // ASSERT: Not before the delay, but after it
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(fired.load(Ordering::SeqCst));

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_schedule_once_cancel_prevents_firing() {
        // ARRANGE
        let pool = WorkerPool::fixed(1).unwrap();
        let scheduler = Scheduler::new(pool.clone());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let scheduled = scheduler.schedule_once(Duration::from_millis(150), move || async move {
            fired_clone.store(true, Ordering::SeqCst);
            Ok(())
        });

        // ACT: Cancel well before the delay elapses
        scheduled.cancel();
        assert!(scheduled.is_cancelled());
        tokio::time::sleep(Duration::from_millis(400)).await;

        // ASSERT
        assert!(!fired.load(Ordering::SeqCst));

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(1)).await);
    }

    // ============================================================
    // TEST 2: Fixed-rate scheduling
    // ============================================================

    #[tokio::test]
    async fn test_fixed_rate_ticks_repeatedly() {
        // ARRANGE
        let pool = WorkerPool::fixed(1).unwrap();
        let scheduler = Scheduler::new(pool.clone());
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();

        // ACT: First run immediately after the initial delay, then every period
        let scheduled = scheduler.schedule_at_fixed_rate(
            Duration::from_millis(10),
            Duration::from_millis(50),
            move || {
                let ticks = ticks_clone.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduled.cancel();

        // ASSERT: Multiple firings happened, none after cancellation
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 ticks, saw {seen}");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_fixed_rate_stops_when_pool_shuts_down() {
        // ARRANGE
        let pool = WorkerPool::fixed(1).unwrap();
        let scheduler = Scheduler::new(pool.clone());
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();

        scheduler.schedule_at_fixed_rate(
            Duration::from_millis(10),
            Duration::from_millis(50),
            move || {
                let ticks = ticks_clone.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );
        tokio::time::sleep(Duration::from_millis(150)).await;

        // ACT: Shutting the pool down ends the schedule on its next tick
        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(1)).await);
        let after_shutdown = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // ASSERT
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
    }
}
