//! Time-driven effects.
//!
//! The core consumes a [`Timer`] wherever it needs a clock or an execution
//! hop; it never owns threads or schedules work itself. [`ThreadTimer`] is
//! the reference implementation. It spends one short-lived thread per wait,
//! fine for tests and small tools, wasteful under load. Production embeds
//! are expected to adapt their scheduler of choice to the trait.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::effect::Effect;

/// Provider of sleeps and asynchronous boundaries.
pub trait Timer {
    /// An effect that completes with unit after `duration`.
    ///
    /// Canceling the interpreting run abandons the wait: the completion is
    /// suppressed even if the underlying clock still fires.
    fn sleep<E>(&self, duration: Duration) -> Effect<(), E>
    where
        E: Send + fmt::Debug + 'static;

    /// An asynchronous boundary: completes with unit from another thread of
    /// execution, giving the calling one back.
    fn shift<E>(&self) -> Effect<(), E>
    where
        E: Send + fmt::Debug + 'static;
}

/// A [`Timer`] backed by plain threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadTimer;

impl ThreadTimer {
    /// Create a thread-backed timer.
    pub fn new() -> Self {
        ThreadTimer
    }
}

impl Timer for ThreadTimer {
    fn sleep<E>(&self, duration: Duration) -> Effect<(), E>
    where
        E: Send + fmt::Debug + 'static,
    {
        Effect::cancelable(move |cb| {
            let abandoned = Arc::new(AtomicBool::new(false));
            let observed = abandoned.clone();
            std::thread::spawn(move || {
                std::thread::sleep(duration);
                if !observed.load(Ordering::SeqCst) {
                    cb.complete(Ok(()));
                }
            });
            Effect::async_(move |done| {
                abandoned.store(true, Ordering::SeqCst);
                done.complete(Ok(()));
            })
        })
    }

    fn shift<E>(&self) -> Effect<(), E>
    where
        E: Send + fmt::Debug + 'static,
    {
        Effect::async_(|cb| {
            std::thread::spawn(move || cb.complete(Ok(())));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_waits_at_least_the_duration() {
        let started = Instant::now();
        ThreadTimer
            .sleep::<String>(Duration::from_millis(25))
            .unsafe_run_sync()
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn shift_hops_to_another_thread() {
        let origin = std::thread::current().id();
        let landed = ThreadTimer
            .shift::<String>()
            .map(move |_| std::thread::current().id() != origin)
            .unsafe_run_sync()
            .unwrap();
        assert!(landed, "continuation should run off the calling thread");
    }

    #[test]
    fn sequenced_sleeps_each_get_their_own_wait() {
        let timer = ThreadTimer;
        let effect = timer
            .sleep::<String>(Duration::from_millis(10))
            .and_then(move |_| timer.sleep(Duration::from_millis(10)))
            .map(|_| "done");
        // each wait is bounded individually, so 15ms per boundary is enough
        assert_eq!(
            effect.unsafe_run_timed(Duration::from_millis(200)),
            Some(Ok("done"))
        );
    }
}
