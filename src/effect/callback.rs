//! Idempotent completion adapters.
//!
//! Every externally exposed callback delivers at most one outcome, re-enters
//! the interpreter through the trampoline so callback recursion cannot grow
//! the host stack, and routes a second invocation carrying an error to the
//! sink instead of dropping it silently.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::effect::connection::Connection;
use crate::effect::node::{boxed, Value};
use crate::report;
use crate::trampoline;

/// The terminal callback of a run.
pub(crate) type DoneFn<E> = Box<dyn FnOnce(Result<Value, E>) + Send>;

/// A completion target. The restart callback of a suspended run implements
/// this, as does the plain once-only function slot below.
pub(crate) trait Complete<E>: Send + Sync {
    fn complete(self: Arc<Self>, result: Result<Value, E>);
}

/// Erased at-most-once completion handle passed to `Async` registrations.
pub(crate) struct Completion<E> {
    target: Arc<dyn Complete<E>>,
}

impl<E> Clone for Completion<E> {
    fn clone(&self) -> Self {
        Completion {
            target: Arc::clone(&self.target),
        }
    }
}

impl<E: Send + fmt::Debug + 'static> Completion<E> {
    pub(crate) fn from_target(target: Arc<dyn Complete<E>>) -> Self {
        Completion { target }
    }

    /// Wrap a terminal callback in a once-only, trampolined slot.
    pub(crate) fn from_done(done: DoneFn<E>) -> Self {
        Completion {
            target: Arc::new(OnceSlot {
                slot: Mutex::new(Some(done)),
            }),
        }
    }

    /// Deliver a result. Duplicates are dropped; a dropped error is
    /// reported to the sink.
    pub(crate) fn complete(&self, result: Result<Value, E>) {
        Arc::clone(&self.target).complete(result);
    }

    /// A completion that first detaches the top cancel hook of `conn`, for
    /// builders that pushed one before registering.
    pub(crate) fn popping(self, conn: Connection) -> Completion<E> {
        Completion {
            target: Arc::new(PopOnDelivery {
                conn,
                popped: AtomicBool::new(false),
                inner: self,
            }),
        }
    }

    /// A per-registration gate in front of a reusable target.
    ///
    /// The run loop's restart callback is re-armed across suspensions, so a
    /// handle that escapes to user code must be pinned to the registration
    /// it was created for: without this, a duplicate delivery arriving
    /// after the run has suspended again would resume the wrong wait.
    pub(crate) fn once(self) -> Completion<E> {
        Completion {
            target: Arc::new(OnceGate {
                called: AtomicBool::new(false),
                inner: self,
            }),
        }
    }
}

struct OnceGate<E> {
    called: AtomicBool,
    inner: Completion<E>,
}

impl<E: Send + fmt::Debug + 'static> Complete<E> for OnceGate<E> {
    fn complete(self: Arc<Self>, result: Result<Value, E>) {
        if !self.called.swap(true, Ordering::SeqCst) {
            self.inner.complete(result);
        } else if let Err(error) = result {
            report::report_failure(&("callback invoked after delivery", error));
        }
    }
}

struct OnceSlot<E> {
    slot: Mutex<Option<DoneFn<E>>>,
}

impl<E: Send + fmt::Debug + 'static> Complete<E> for OnceSlot<E> {
    fn complete(self: Arc<Self>, result: Result<Value, E>) {
        let taken = self.slot.lock().unwrap().take();
        match taken {
            Some(done) => trampoline::execute(Box::new(move || done(result))),
            None => {
                if let Err(error) = result {
                    report::report_failure(&("callback invoked after delivery", error));
                }
            }
        }
    }
}

struct PopOnDelivery<E> {
    conn: Connection,
    popped: AtomicBool,
    inner: Completion<E>,
}

impl<E: Send + fmt::Debug + 'static> Complete<E> for PopOnDelivery<E> {
    fn complete(self: Arc<Self>, result: Result<Value, E>) {
        if !self.popped.swap(true, Ordering::SeqCst) {
            self.conn.pop();
        }
        self.inner.complete(result);
    }
}

/// The completion handle handed to [`Effect::async_`] and
/// [`Effect::cancelable`] registrations.
///
/// The first [`complete`](Callback::complete) wins; later invocations are
/// dropped, with a dropped error reported to the sink. The handle is `Clone`
/// and `Send` so an external event source can carry it wherever the result
/// is produced.
///
/// [`Effect::async_`]: crate::Effect::async_
/// [`Effect::cancelable`]: crate::Effect::cancelable
pub struct Callback<A, E> {
    inner: Completion<E>,
    _marker: PhantomData<fn(A)>,
}

impl<A, E> Clone for Callback<A, E> {
    fn clone(&self) -> Self {
        Callback {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Callback<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").finish_non_exhaustive()
    }
}

impl<A: Send + 'static, E: Send + fmt::Debug + 'static> Callback<A, E> {
    pub(crate) fn new(inner: Completion<E>) -> Self {
        Callback {
            inner,
            _marker: PhantomData,
        }
    }

    /// Deliver the outcome of the external operation.
    pub fn complete(&self, result: Result<A, E>) {
        self.inner.complete(result.map(boxed));
    }
}
