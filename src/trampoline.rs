//! The immediate executor.
//!
//! Runs tiny continuations inline, but through a thread-local queue: a task
//! submitted while another task is already executing is enqueued instead of
//! invoked on the spot. Recursion through callbacks therefore turns into
//! iteration and cannot grow the host stack, no matter how many synchronous
//! asynchronous-boundaries a run crosses back to back.

use std::cell::RefCell;
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<Option<VecDeque<Task>>> = const { RefCell::new(None) };
}

/// Run `task` now, or enqueue it if a trampolined task is already running
/// on this thread.
pub(crate) fn execute(task: Task) {
    let run_now = QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if let Some(pending) = q.as_mut() {
            pending.push_back(task);
            return None;
        }
        *q = Some(VecDeque::new());
        Some(task)
    });

    let Some(first) = run_now else { return };

    let mut next = first;
    loop {
        next();
        let dequeued = QUEUE.with(|q| q.borrow_mut().as_mut().and_then(|p| p.pop_front()));
        match dequeued {
            Some(task) => next = task,
            None => break,
        }
    }
    QUEUE.with(|q| *q.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_immediately_when_idle() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        execute(Box::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_submissions_run_in_fifo_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        execute(Box::new(move || {
            let o2 = o1.clone();
            let o3 = o1.clone();
            execute(Box::new(move || o2.lock().unwrap().push("second")));
            execute(Box::new(move || o3.lock().unwrap().push("third")));
            o1.lock().unwrap().push("first");
        }));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn deep_reentrancy_does_not_overflow() {
        fn bounce(n: usize, hits: Arc<AtomicUsize>) {
            hits.fetch_add(1, Ordering::SeqCst);
            if n > 0 {
                execute(Box::new(move || bounce(n - 1, hits)));
            }
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        execute(Box::new(move || bounce(100_000, hits2)));
        assert_eq!(hits.load(Ordering::SeqCst), 100_001);
    }
}
