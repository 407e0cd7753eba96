//! Cancellation operators.
//!
//! Cancellation is cooperative. Signalling a connection flips its flag and
//! fires its hooks, which stop external event sources, but an in-flight
//! synchronous stretch of the run loop is never interrupted. These
//! operators shape how a computation relates to that signal: ignore it for
//! a region, reify it as a typed error, or volunteer a checkpoint.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::effect::callback::Callback;
use crate::effect::connection::Connection;
use crate::effect::node::{boxed, Node};
use crate::effect::runloop;
use crate::effect::Effect;
use crate::fault::Fault;
use crate::report;

/// Run `node` on a fresh uncancelable run, delivering into `completion`.
pub(crate) fn uncancelable_node<E: Send + fmt::Debug + 'static>(node: Node<E>) -> Node<E> {
    Node::Async {
        register: Box::new(move |_conn, completion| {
            runloop::start(node, Box::new(move |result| completion.complete(result)));
        }),
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + fmt::Debug + 'static,
{
    /// Mask cancellation for the duration of this effect.
    ///
    /// The effect runs with an uncancelable connection substituted for the
    /// caller's; a cancel signalled outside does not terminate it. The
    /// signal is not queued for re-delivery: when the region completes,
    /// the surrounding run simply observes its (by then canceled)
    /// connection at the next boundary.
    pub fn uncancelable(self) -> Self {
        Effect::from_node(uncancelable_node(self.into_node()))
    }

    /// Reify a cancel signal as the typed error `error`.
    ///
    /// By default a canceled computation never completes. Wrapped in this
    /// operator, a cancel delivered while the effect is active terminates
    /// it with `Err(error)` instead, which recovery combinators downstream
    /// can observe like any other failure.
    pub fn on_cancel_raise_error(self, error: E) -> Self {
        let node = self.into_node();
        Effect::from_node(Node::Async {
            register: Box::new(move |conn, completion| {
                let conn = conn.clone();
                let delivered = Arc::new(AtomicBool::new(false));
                let child = Connection::cancelable();
                {
                    let delivered = delivered.clone();
                    let child = child.clone();
                    let completion = completion.clone();
                    conn.push_fn(move || {
                        if !delivered.swap(true, Ordering::SeqCst) {
                            completion.complete(Err(error));
                            child.cancel();
                        }
                    });
                }
                runloop::start_cancelable(
                    node,
                    child,
                    Box::new(move |result| {
                        if !delivered.swap(true, Ordering::SeqCst) {
                            conn.pop();
                            completion.complete(result);
                        } else if let Err(late) = result {
                            report::report_failure(&("canceled computation failed late", late));
                        }
                    }),
                );
            }),
        })
    }

    /// An externally driven effect with a cancel action.
    ///
    /// Like [`async_`](Effect::async_), but `register` returns an effect to
    /// run if the interpretation is canceled while the registration is
    /// outstanding. The cancel action runs uncancelably; its failure is
    /// reported to the sink. A panicking `register` is reported and the
    /// cancel action degrades to a no-op.
    ///
    /// ```rust,ignore
    /// let sleep: Effect<(), String> = Effect::cancelable(|cb| {
    ///     let handle = timer_wheel.schedule(deadline, move || cb.complete(Ok(())));
    ///     Effect::delay(move || timer_wheel.unschedule(handle), |f| f.to_string())
    /// });
    /// ```
    pub fn cancelable<F>(register: F) -> Self
    where
        F: FnOnce(Callback<A, E>) -> Effect<(), E> + Send + 'static,
    {
        Effect::from_node(Node::Async {
            register: Box::new(move |conn, completion| {
                let conn = conn.clone();
                let forward = Arc::new(ForwardCancelable::new());
                {
                    let forward = forward.clone();
                    conn.push(Box::new(move |done| forward.cancel(done)));
                }
                let callback = Callback::new(completion.popping(conn).once());
                match catch_unwind(AssertUnwindSafe(move || register(callback))) {
                    Ok(token) => forward.set(token.into_node()),
                    Err(payload) => {
                        let fault = Fault::new(payload);
                        report::report_failure(&("cancelable registration failed", &fault));
                        forward.set(Node::pure_unit());
                    }
                }
            }),
        })
    }
}

impl<E> Effect<(), E>
where
    E: Send + fmt::Debug + 'static,
{
    /// A checkpoint at which cancellation is honored.
    ///
    /// Completes immediately with unit when the current connection is not
    /// canceled; otherwise never completes, letting the cancel take effect
    /// between binds of an otherwise synchronous loop.
    pub fn cancel_boundary() -> Self {
        Effect::from_node(Node::Async {
            register: Box::new(|conn, completion| {
                if !conn.is_canceled() {
                    completion.complete(Ok(boxed(())));
                }
            }),
        })
    }
}

/// A cancel token whose content arrives after it is pushed.
///
/// The cancelable builder pushes the placeholder before invoking the user's
/// registration, then fills it with whatever cancel effect the registration
/// returns. A cancel that arrives in between parks until the token is set.
struct ForwardCancelable<E> {
    state: Mutex<ForwardState<E>>,
}

enum ForwardState<E> {
    Empty,
    CancelPending(Box<dyn FnOnce() + Send>),
    Set(Node<E>),
    Finished,
}

impl<E: Send + fmt::Debug + 'static> ForwardCancelable<E> {
    fn new() -> Self {
        ForwardCancelable {
            state: Mutex::new(ForwardState::Empty),
        }
    }

    fn set(&self, node: Node<E>) {
        let pending = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, ForwardState::Finished) {
                ForwardState::Empty => {
                    *state = ForwardState::Set(node);
                    None
                }
                ForwardState::CancelPending(done) => Some((node, done)),
                // set is called once per registration; a repeat drops the
                // late token
                other => {
                    *state = other;
                    None
                }
            }
        };
        if let Some((node, done)) = pending {
            run_token(node, done);
        }
    }

    fn cancel(&self, done: Box<dyn FnOnce() + Send>) {
        let action = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, ForwardState::Finished) {
                ForwardState::Empty => {
                    *state = ForwardState::CancelPending(done);
                    None
                }
                ForwardState::Set(node) => Some((node, done)),
                ForwardState::CancelPending(pending) => {
                    *state = ForwardState::CancelPending(pending);
                    Some((Node::pure_unit(), done))
                }
                ForwardState::Finished => Some((Node::pure_unit(), done)),
            }
        };
        if let Some((node, done)) = action {
            run_token(node, done);
        }
    }
}

fn run_token<E: Send + fmt::Debug + 'static>(node: Node<E>, done: Box<dyn FnOnce() + Send>) {
    runloop::start(
        node,
        Box::new(move |result: Result<_, E>| {
            if let Err(error) = result {
                report::report_failure(&("cancel action failed", error));
            }
            done();
        }),
    );
}
