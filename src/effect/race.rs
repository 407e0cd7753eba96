//! Two-way concurrent racing.
//!
//! Both contenders start on fresh cancelable connections; the first outcome
//! wins a single atomic swap. [`race`] cancels the loser, [`race_pair`]
//! hands the winner a [`Fiber`] for it instead. Either way, exactly one
//! result reaches the caller, and a losing branch's failure is reported to
//! the sink rather than vanishing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::effect::connection::Connection;
use crate::effect::fiber::{Fiber, Slot};
use crate::effect::node::{boxed, unbox, Node, Value};
use crate::effect::runloop;
use crate::effect::Effect;
use crate::either::Either;
use crate::report;

/// Race two effects; the loser is canceled.
///
/// Yields `Left(a)` when the left effect finishes first, `Right(b)` when
/// the right one does. A winning *failure* short-circuits the same way: the
/// error propagates and the other side is canceled. A failure that loses
/// the race has nowhere to go and is reported to the sink.
///
/// ```rust,ignore
/// let winner = race(
///     timer.sleep(Duration::from_millis(10)).map(|_| 1),
///     timer.sleep(Duration::from_millis(20)).map(|_| 2),
/// );
/// assert_eq!(winner.unsafe_run_sync(), Ok(Either::Left(1)));
/// ```
pub fn race<A, B, E>(left: Effect<A, E>, right: Effect<B, E>) -> Effect<Either<A, B>, E>
where
    A: Send + 'static,
    B: Send + 'static,
    E: Send + fmt::Debug + 'static,
{
    let left = left.into_node();
    let right = right.into_node();
    Effect::from_node(Node::Async {
        register: Box::new(move |conn, completion| {
            let conn = conn.clone();
            let active = Arc::new(AtomicBool::new(true));
            let conn_left = Connection::cancelable();
            let conn_right = Connection::cancelable();
            conn.push_pair(conn_left.clone(), conn_right.clone());

            {
                let active = active.clone();
                let conn = conn.clone();
                let other = conn_right.clone();
                let completion = completion.clone();
                runloop::start_cancelable(
                    left,
                    conn_left.clone(),
                    Box::new(move |result: Result<Value, E>| {
                        settle_race(result, &active, &conn, &other, &completion, |value| {
                            boxed(Either::<A, B>::Left(unbox::<A>(value)))
                        });
                    }),
                );
            }
            runloop::start_cancelable(
                right,
                conn_right,
                Box::new(move |result: Result<Value, E>| {
                    settle_race(result, &active, &conn, &conn_left, &completion, |value| {
                        boxed(Either::<A, B>::Right(unbox::<B>(value)))
                    });
                }),
            );
        }),
    })
}

/// Arbitrate one contender's outcome. The single swap on `active` decides
/// the winner; only the winner pops the composite hook, cancels the other
/// side, and delivers.
fn settle_race<E>(
    result: Result<Value, E>,
    active: &AtomicBool,
    conn: &Connection,
    other: &Connection,
    completion: &crate::effect::callback::Completion<E>,
    wrap: impl FnOnce(Value) -> Value,
) where
    E: Send + fmt::Debug + 'static,
{
    let won = active.swap(false, Ordering::SeqCst);
    match result {
        Ok(value) => {
            if won {
                conn.pop();
                other.cancel();
                completion.complete(Ok(wrap(value)));
            }
        }
        Err(error) => {
            if won {
                conn.pop();
                other.cancel();
                completion.complete(Err(error));
            } else {
                report::report_failure(&("race loser failed", error));
            }
        }
    }
}

/// Race two effects without canceling the loser.
///
/// The winner is paired with a [`Fiber`] for the other side, which keeps
/// running and populates its own completion slot when it finishes; the
/// fiber's `join` consults that slot, its `cancel` signals the loser's
/// connection. A winning failure cannot deliver the pair, so it cancels
/// the loser and propagates.
pub fn race_pair<A, B, E>(
    left: Effect<A, E>,
    right: Effect<B, E>,
) -> Effect<Either<(A, Fiber<B, E>), (Fiber<A, E>, B)>, E>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    E: Clone + Send + fmt::Debug + 'static,
{
    let left = left.into_node();
    let right = right.into_node();
    Effect::from_node(Node::Async {
        register: Box::new(move |conn, completion| {
            let conn = conn.clone();
            let active = Arc::new(AtomicBool::new(true));
            let conn_left = Connection::cancelable();
            let conn_right = Connection::cancelable();
            let slot_left: Arc<Slot<A, E>> = Arc::new(Slot::new());
            let slot_right: Arc<Slot<B, E>> = Arc::new(Slot::new());
            conn.push_pair(conn_left.clone(), conn_right.clone());

            {
                let active = active.clone();
                let conn = conn.clone();
                let completion = completion.clone();
                let slot_left = slot_left.clone();
                let slot_right = slot_right.clone();
                let conn_right2 = conn_right.clone();
                runloop::start_cancelable(
                    left,
                    conn_left.clone(),
                    Box::new(move |result: Result<Value, E>| {
                        if active.swap(false, Ordering::SeqCst) {
                            match result {
                                Ok(value) => {
                                    conn.pop();
                                    let fiber = Fiber::new(slot_right, conn_right2);
                                    completion.complete(Ok(boxed(
                                        Either::<(A, Fiber<B, E>), (Fiber<A, E>, B)>::Left((
                                            unbox::<A>(value),
                                            fiber,
                                        )),
                                    )));
                                }
                                Err(error) => {
                                    conn_right2.cancel();
                                    conn.pop();
                                    completion.complete(Err(error));
                                }
                            }
                        } else {
                            slot_left.complete(result.map(unbox::<A>));
                        }
                    }),
                );
            }
            runloop::start_cancelable(
                right,
                conn_right,
                Box::new(move |result: Result<Value, E>| {
                    if active.swap(false, Ordering::SeqCst) {
                        match result {
                            Ok(value) => {
                                conn.pop();
                                let fiber = Fiber::new(slot_left, conn_left);
                                completion.complete(Ok(boxed(
                                    Either::<(A, Fiber<B, E>), (Fiber<A, E>, B)>::Right((
                                        fiber,
                                        unbox::<B>(value),
                                    )),
                                )));
                            }
                            Err(error) => {
                                conn_left.cancel();
                                conn.pop();
                                completion.complete(Err(error));
                            }
                        }
                    } else {
                        slot_right.complete(result.map(unbox::<B>));
                    }
                }),
            );
        }),
    })
}
