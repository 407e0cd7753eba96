//! Per-run cancellation tokens.
//!
//! A [`Connection`] scopes cancellation to one interpretation of an effect.
//! It is either uncancelable (a no-op token handed to runs that cannot be
//! interrupted) or a LIFO stack of cancel hooks guarded by a monotonic
//! `is_canceled` flag.
//!
//! Hooks are stored in continuation-passing form (run the hook, then call
//! `done`) so that cancel hooks which are themselves effects with
//! asynchronous parts can be sequenced without the connection knowing
//! anything about error types.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::effect::node::Node;
use crate::effect::runloop;
use crate::report;
use crate::trampoline;

/// A cancel hook: run, then invoke `done` exactly once.
pub(crate) type Hook = Box<dyn FnOnce(Box<dyn FnOnce() + Send>) + Send>;

/// Cancellation token for one run.
#[derive(Clone)]
pub(crate) struct Connection {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Uncancelable,
    Cancelable(Arc<State>),
}

struct State {
    canceled: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
}

impl Connection {
    /// The no-op token: cancel does nothing, `is_canceled` is always false,
    /// push and pop are ignored.
    pub(crate) fn uncancelable() -> Self {
        Connection {
            inner: Inner::Uncancelable,
        }
    }

    pub(crate) fn cancelable() -> Self {
        Connection {
            inner: Inner::Cancelable(Arc::new(State {
                canceled: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
            })),
        }
    }

    /// Monotonic: once true, stays true.
    pub(crate) fn is_canceled(&self) -> bool {
        match &self.inner {
            Inner::Uncancelable => false,
            Inner::Cancelable(state) => state.canceled.load(Ordering::SeqCst),
        }
    }

    /// Attach a cancel hook. If the connection is already canceled the hook
    /// runs immediately instead of being enqueued.
    pub(crate) fn push(&self, hook: Hook) {
        match &self.inner {
            Inner::Uncancelable => {}
            Inner::Cancelable(state) => {
                if state.canceled.load(Ordering::SeqCst) {
                    hook(Box::new(|| {}));
                    return;
                }
                let mut hooks = state.hooks.lock().unwrap();
                // cancel may have drained the stack between the check and
                // the lock
                if state.canceled.load(Ordering::SeqCst) {
                    drop(hooks);
                    hook(Box::new(|| {}));
                } else {
                    hooks.push(hook);
                }
            }
        }
    }

    /// Attach a plain closure as a cancel hook.
    pub(crate) fn push_fn(&self, f: impl FnOnce() + Send + 'static) {
        self.push(Box::new(move |done| {
            f();
            done();
        }));
    }

    /// Attach an effect as a cancel hook. It runs on an uncancelable run
    /// when the connection is canceled; failures go to the sink.
    pub(crate) fn push_effect<E: Send + fmt::Debug + 'static>(&self, node: Node<E>) {
        self.push(Box::new(move |done| {
            runloop::start(
                node,
                Box::new(move |result: Result<_, E>| {
                    if let Err(error) = result {
                        report::report_failure(&("cancel hook failed", error));
                    }
                    done();
                }),
            );
        }));
    }

    /// Attach a hook canceling two child connections in order.
    pub(crate) fn push_pair(&self, first: Connection, second: Connection) {
        self.push(Box::new(move |done| {
            first.cancel_with(Box::new(move || second.cancel_with(done)));
        }));
    }

    /// Detach the most recently pushed hook without running it.
    pub(crate) fn pop(&self) {
        if let Inner::Cancelable(state) = &self.inner {
            state.hooks.lock().unwrap().pop();
        }
    }

    /// Signal cancellation. Idempotent: the hook stack is drained once, in
    /// reverse push order; a second cancel finds the flag already set.
    pub(crate) fn cancel(&self) {
        self.cancel_with(Box::new(|| {}));
    }

    /// Signal cancellation and invoke `done` once every hook has finished.
    pub(crate) fn cancel_with(&self, done: Box<dyn FnOnce() + Send>) {
        match &self.inner {
            Inner::Uncancelable => done(),
            Inner::Cancelable(state) => {
                if state.canceled.swap(true, Ordering::SeqCst) {
                    done();
                    return;
                }
                let hooks = std::mem::take(&mut *state.hooks.lock().unwrap());
                run_hooks(hooks, done);
            }
        }
    }
}

fn run_hooks(mut hooks: Vec<Hook>, done: Box<dyn FnOnce() + Send>) {
    match hooks.pop() {
        None => done(),
        Some(hook) => hook(Box::new(move || {
            trampoline::execute(Box::new(move || run_hooks(hooks, done)));
        })),
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Uncancelable => f.write_str("Connection::Uncancelable"),
            Inner::Cancelable(state) => f
                .debug_struct("Connection")
                .field("canceled", &state.canceled.load(Ordering::SeqCst))
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_hook(counter: Arc<AtomicUsize>) -> Hook {
        Box::new(move |done| {
            counter.fetch_add(1, Ordering::SeqCst);
            done();
        })
    }

    #[test]
    fn cancel_runs_hooks_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let conn = Connection::cancelable();
        for label in ["first", "second", "third"] {
            let order = order.clone();
            conn.push_fn(move || order.lock().unwrap().push(label));
        }
        conn.cancel();
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn cancel_is_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let conn = Connection::cancelable();
        conn.push(counting_hook(hits.clone()));
        conn.cancel();
        conn.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(conn.is_canceled());
    }

    #[test]
    fn push_after_cancel_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let conn = Connection::cancelable();
        conn.cancel();
        conn.push(counting_hook(hits.clone()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pop_detaches_the_top_hook() {
        let hits = Arc::new(AtomicUsize::new(0));
        let conn = Connection::cancelable();
        conn.push(counting_hook(hits.clone()));
        conn.push(counting_hook(hits.clone()));
        conn.pop();
        conn.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn uncancelable_ignores_everything() {
        let hits = Arc::new(AtomicUsize::new(0));
        let conn = Connection::uncancelable();
        conn.push(counting_hook(hits.clone()));
        conn.cancel();
        assert!(!conn.is_canceled());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_with_waits_for_hooks() {
        let conn = Connection::cancelable();
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = order.clone();
            conn.push_fn(move || order.lock().unwrap().push("hook"));
        }
        let order2 = order.clone();
        conn.cancel_with(Box::new(move || order2.lock().unwrap().push("done")));
        assert_eq!(*order.lock().unwrap(), vec!["hook", "done"]);
    }
}
