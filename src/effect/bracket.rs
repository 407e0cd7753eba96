//! Acquire/use/release resource safety.
//!
//! [`bracket_case`](crate::Effect::bracket_case) guarantees that once the
//! acquire phase succeeds, the release action runs exactly once,
//! whether the use phase succeeds, fails, or is canceled, and always observes the
//! true [`ExitCase`]. A failing release never overrides the primary
//! outcome; it is reported to the sink instead.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::effect::cancel::uncancelable_node;
use crate::effect::connection::Connection;
use crate::effect::node::{fatal_err_map, unbox, BindFrame, Node};
use crate::effect::runloop;
use crate::effect::Effect;
use crate::report;

/// How the use phase of a bracket ended, as seen by the release action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitCase<E> {
    /// The use effect produced a value.
    Completed,
    /// The use effect failed with this error.
    Error(E),
    /// The run was canceled during the use phase.
    Canceled,
}

type ReleaseFn<A, E> = Box<dyn FnOnce(A, ExitCase<E>) -> Effect<(), E> + Send>;

/// The resource and its release action, owned by whichever path observes
/// the terminal event first. Taking it is the at-most-once release guard.
struct ReleasePayload<A, E> {
    resource: A,
    release: ReleaseFn<A, E>,
}

type SharedPayload<A, E> = Arc<Mutex<Option<ReleasePayload<A, E>>>>;

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Clone + Send + fmt::Debug + 'static,
{
    /// Acquire a resource, use it, and release it exactly once.
    ///
    /// `self` is the acquire effect. The use function borrows the resource
    /// to build the use effect; the release function takes ownership back.
    /// When acquire fails, release is not called (the resource never
    /// existed). A failing release is reported to the sink and the use
    /// outcome stands.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::<_, String>::pure(vec![1, 2, 3]).bracket(
    ///     |data| Effect::pure(data.len()),
    ///     |_data| Effect::unit(),
    /// );
    /// assert_eq!(effect.unsafe_run_sync(), Ok(3));
    /// ```
    pub fn bracket<B, U, R>(self, use_fn: U, release: R) -> Effect<B, E>
    where
        B: Send + 'static,
        U: FnOnce(&A) -> Effect<B, E> + Send + 'static,
        R: FnOnce(A) -> Effect<(), E> + Send + 'static,
    {
        self.bracket_case(use_fn, |resource, _exit| release(resource))
    }

    /// [`bracket`](Effect::bracket) with the exit case delivered to release.
    ///
    /// The acquire phase runs uncancelably. During the use phase a cancel
    /// token holding the resource is attached to the caller's connection:
    /// a cancel that wins the race for the resource runs
    /// `release(resource, Canceled)` and the surrounding computation never
    /// completes, mirroring the upstream cancel. The release effect itself
    /// always runs uncancelably.
    pub fn bracket_case<B, U, R>(self, use_fn: U, release: R) -> Effect<B, E>
    where
        B: Send + 'static,
        U: FnOnce(&A) -> Effect<B, E> + Send + 'static,
        R: FnOnce(A, ExitCase<E>) -> Effect<(), E> + Send + 'static,
    {
        let acquire = self.into_node();
        Effect::from_node(Node::Async {
            register: Box::new(move |conn, completion| {
                let conn = conn.clone();
                runloop::start(
                    acquire,
                    Box::new(move |acquired: Result<_, E>| match acquired {
                        Err(error) => completion.complete(Err(error)),
                        Ok(value) => {
                            let resource: A = unbox(value);
                            let use_effect =
                                runloop::call_protected(|| use_fn(&resource)).into_node();

                            let payload: SharedPayload<A, E> =
                                Arc::new(Mutex::new(Some(ReleasePayload {
                                    resource,
                                    release: Box::new(release),
                                })));
                            conn.push_effect(cancel_token(payload.clone()));

                            let ok_payload = payload.clone();
                            let ok_conn = conn.clone();
                            let err_conn = conn.clone();
                            let wired = Node::Bind {
                                source: Box::new(use_effect),
                                frame: BindFrame::Redeem {
                                    ok: Box::new(move |value| {
                                        settle(ok_payload, ok_conn, ExitCase::Completed, Node::Pure(value))
                                    }),
                                    err: Box::new(move |error: E| {
                                        settle(
                                            payload,
                                            err_conn,
                                            ExitCase::Error(error.clone()),
                                            Node::RaiseError(error),
                                        )
                                    }),
                                },
                            };
                            runloop::start_cancelable(
                                wired,
                                conn,
                                Box::new(move |result| completion.complete(result)),
                            );
                        }
                    }),
                );
            }),
        })
    }

    /// Run a finalizer after this effect, regardless of outcome.
    pub fn guarantee(self, finalizer: Effect<(), E>) -> Self {
        self.guarantee_case(move |_exit| finalizer)
    }

    /// Run a finalizer observing how this effect ended.
    pub fn guarantee_case<F>(self, finalizer: F) -> Self
    where
        F: FnOnce(ExitCase<E>) -> Effect<(), E> + Send + 'static,
    {
        Effect::unit().bracket_case(move |_| self, move |_, exit| finalizer(exit))
    }
}

/// The use phase finished: take the payload, detach the cancel token, run
/// release uncancelably, then continue with `after`. A payload already
/// taken means the cancel hook won; the frame then mirrors the upstream
/// cancel by never completing.
fn settle<A, E>(
    payload: SharedPayload<A, E>,
    conn: Connection,
    exit: ExitCase<E>,
    after: Node<E>,
) -> Node<E>
where
    A: Send + 'static,
    E: Send + fmt::Debug + 'static,
{
    match payload.lock().unwrap().take() {
        None => Node::never(),
        Some(taken) => {
            conn.pop();
            Node::Bind {
                source: Box::new(uncancelable_node(reported_release(taken, exit))),
                frame: BindFrame::Plain(Box::new(move |_| after)),
            }
        }
    }
}

/// Build the release effect, with failures routed to the sink.
fn reported_release<A, E>(taken: ReleasePayload<A, E>, exit: ExitCase<E>) -> Node<E>
where
    A: Send + 'static,
    E: Send + fmt::Debug + 'static,
{
    let release_effect =
        runloop::call_protected(|| (taken.release)(taken.resource, exit)).into_node();
    Node::Bind {
        source: Box::new(release_effect),
        frame: BindFrame::Redeem {
            ok: Box::new(|_| Node::pure_unit()),
            err: Box::new(|error| {
                report::report_failure(&("resource release failed", &error));
                Node::pure_unit()
            }),
        },
    }
}

/// The cancel token: if the payload is still in place when cancellation
/// fires, run `release(resource, Canceled)`.
fn cancel_token<A, E>(payload: SharedPayload<A, E>) -> Node<E>
where
    A: Send + 'static,
    E: Send + fmt::Debug + 'static,
{
    Node::Suspend {
        thunk: Box::new(move || match payload.lock().unwrap().take() {
            None => Node::pure_unit(),
            Some(taken) => reported_release(taken, ExitCase::Canceled),
        }),
        err_map: fatal_err_map(),
    }
}
