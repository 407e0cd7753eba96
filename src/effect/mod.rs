//! The effect type and its interpreter.
//!
//! An [`Effect<A, E>`] is an immutable *description* of a computation that,
//! when interpreted, produces `Ok(A)` or `Err(E)`. Nothing happens at
//! construction time: `pure`, `delay`, `map`, `and_then` and friends only
//! build a tree. The `unsafe_run_*` family hands that tree to the run loop,
//! which walks it with an explicit bind stack (stack-safe at any depth),
//! suspends on asynchronous nodes, and delivers exactly one outcome.
//!
//! # Quick example
//!
//! ```
//! use millrace::Effect;
//!
//! let effect = Effect::<_, String>::pure(5)
//!     .map(|x| x * 2)
//!     .and_then(|x| Effect::pure(x + 32));
//!
//! assert_eq!(effect.unsafe_run_sync(), Ok(42));
//! ```
//!
//! # Errors and faults
//!
//! The error channel `E` is polymorphic and flows through [`and_then`]
//! chains until an [`or_else`] / [`attempt`] handler catches it. A *host
//! fault* (a panic) is a different animal: inside a [`delay`] or
//! [`suspend`] thunk it is caught and converted through the constructor's
//! `err_map`; inside a continuation it is reported to the sink and resumed,
//! because sequencing a programming bug into the error channel would hide
//! it.
//!
//! # Cancellation
//!
//! Runs started with [`unsafe_run_cancelable`], fibers created by
//! [`start`], and the losing side of [`race`] can be canceled. Cancellation
//! is cooperative: it stops external event sources through their registered
//! cancel hooks and takes effect at asynchronous boundaries; by default the
//! canceled computation simply never completes. [`bracket`] converts a
//! cancel into a `Canceled` exit for its release action, and
//! [`on_cancel_raise_error`] reifies it as a typed error.
//!
//! [`Effect<A, E>`]: Effect
//! [`and_then`]: Effect::and_then
//! [`or_else`]: Effect::or_else
//! [`attempt`]: Effect::attempt
//! [`delay`]: Effect::delay
//! [`suspend`]: Effect::suspend
//! [`start`]: Effect::start
//! [`bracket`]: Effect::bracket
//! [`on_cancel_raise_error`]: Effect::on_cancel_raise_error
//! [`unsafe_run_cancelable`]: Effect::unsafe_run_cancelable
//! [`race`]: crate::race

pub(crate) mod callback;
pub(crate) mod connection;
pub(crate) mod node;
pub(crate) mod runloop;

mod bracket;
mod cancel;
mod fiber;
mod interop;
mod race;

pub use bracket::ExitCase;
pub use callback::Callback;
pub use fiber::Fiber;
pub use race::{race, race_pair};

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::either::Either;
use crate::fault::Fault;

use self::connection::Connection;
use self::node::{boxed, unbox, BindFrame, Node, FUSION_MAX_DEPTH};

/// An immutable description of a computation yielding `A` or failing with
/// `E`.
///
/// Effects are values: running one never mutates it, and interpreting the
/// same effect twice performs its work twice. See the [module
/// docs](self) for the full tour.
pub struct Effect<A, E = Fault> {
    node: Node<E>,
    _marker: PhantomData<fn() -> A>,
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Effect").field(&self.node.tag()).finish()
    }
}

impl<A, E> Effect<A, E> {
    pub(crate) fn from_node(node: Node<E>) -> Self {
        Effect {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_node(self) -> Node<E> {
        self.node
    }
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// An effect that immediately succeeds with `value`.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::<_, String>::pure(42);
    /// assert_eq!(effect.unsafe_run_sync(), Ok(42));
    /// ```
    pub fn pure(value: A) -> Self {
        Effect::from_node(Node::Pure(boxed(value)))
    }

    /// An effect that immediately fails with `error`.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::<i32, _>::raise_error("nope");
    /// assert_eq!(effect.unsafe_run_sync(), Err("nope"));
    /// ```
    pub fn raise_error(error: E) -> Self {
        Effect::from_node(Node::RaiseError(error))
    }

    /// Suspend a synchronous computation.
    ///
    /// `thunk` runs each time the effect is interpreted. A panic inside it
    /// is caught and converted to `E` through `err_map`; what that
    /// conversion should be for your error type is yours to decide (see
    /// [`Fault`]).
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::delay(|| 40 + 2, |fault| fault.to_string());
    /// assert_eq!(effect.unsafe_run_sync(), Ok::<_, String>(42));
    /// ```
    pub fn delay<F, M>(thunk: F, err_map: M) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
        M: FnOnce(Fault) -> E + Send + 'static,
    {
        Effect::from_node(Node::Delay {
            thunk: Box::new(move || boxed(thunk())),
            err_map: Box::new(err_map),
        })
    }

    /// Suspend the *construction* of an effect.
    ///
    /// Where [`delay`](Effect::delay) defers a value, `suspend` defers a
    /// whole effect; this is the building block for trampolined recursion:
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// fn countdown(n: u64) -> Effect<u64, String> {
    ///     Effect::suspend(
    ///         move || {
    ///             if n == 0 {
    ///                 Effect::pure(0)
    ///             } else {
    ///                 countdown(n - 1).map(move |acc| acc + 1)
    ///             }
    ///         },
    ///         |fault| fault.to_string(),
    ///     )
    /// }
    ///
    /// assert_eq!(countdown(100_000).unsafe_run_sync(), Ok(100_000));
    /// ```
    pub fn suspend<F, M>(thunk: F, err_map: M) -> Self
    where
        F: FnOnce() -> Effect<A, E> + Send + 'static,
        M: FnOnce(Fault) -> E + Send + 'static,
    {
        Effect::from_node(Node::Suspend {
            thunk: Box::new(move || thunk().into_node()),
            err_map: Box::new(err_map),
        })
    }

    /// Lift an [`Either`] into an effect: `Left` fails, `Right` succeeds.
    pub fn from_either(either: Either<E, A>) -> Self {
        match either {
            Either::Left(error) => Effect::raise_error(error),
            Either::Right(value) => Effect::pure(value),
        }
    }

    /// Lift an `Option` into an effect, failing when it is `None`.
    pub fn from_option<F>(option: Option<A>, or_else: F) -> Self
    where
        F: FnOnce() -> E,
    {
        match option {
            Some(value) => Effect::pure(value),
            None => Effect::raise_error(or_else()),
        }
    }

    /// An effect that never completes.
    ///
    /// Its registration drops the completion handle, so a run blocked on it
    /// releases its resources and simply never delivers.
    pub fn never() -> Self {
        Effect::from_node(Node::never())
    }

    /// An externally driven effect.
    ///
    /// `register` receives a [`Callback`] and is invoked once per
    /// interpretation; whoever holds the callback delivers the result, at
    /// most once. A second delivery is dropped (and reported to the sink if
    /// it carried an error).
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect: Effect<i32, String> = Effect::async_(|cb| {
    ///     std::thread::spawn(move || cb.complete(Ok(42)));
    /// });
    /// assert_eq!(effect.unsafe_run_sync(), Ok(42));
    /// ```
    pub fn async_<F>(register: F) -> Self
    where
        F: FnOnce(Callback<A, E>) + Send + 'static,
        E: fmt::Debug,
    {
        Effect::from_node(Node::Async {
            register: Box::new(move |_conn, completion| {
                runloop::call_protected(move || register(Callback::new(completion.once())));
            }),
        })
    }

    /// Transform the success value.
    ///
    /// Consecutive `map`s fuse into one node by closure composition, up to a
    /// fixed depth that keeps the composed call chain off the deep end of
    /// the host stack.
    pub fn map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        let node = match self.node {
            Node::Map { source, f: prev, depth } if depth < FUSION_MAX_DEPTH => Node::Map {
                source,
                f: Box::new(move |value| boxed(f(unbox::<A>(prev(value))))),
                depth: depth + 1,
            },
            other => Node::Map {
                source: Box::new(other),
                f: Box::new(move |value| boxed(f(unbox::<A>(value)))),
                depth: 0,
            },
        };
        Effect::from_node(node)
    }

    /// Sequence a dependent effect (monadic bind).
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::<_, String>::pure(5).and_then(|x| Effect::pure(x * 2));
    /// assert_eq!(effect.unsafe_run_sync(), Ok(10));
    /// ```
    pub fn and_then<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<B, E> + Send + 'static,
    {
        Effect::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: BindFrame::Plain(Box::new(move |value| f(unbox::<A>(value)).into_node())),
        })
    }

    /// Materialise the outcome: failures become `Left`, successes `Right`,
    /// and the resulting effect itself cannot fail.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::{Effect, Either};
    ///
    /// let failed = Effect::<i32, _>::raise_error("e").attempt();
    /// assert_eq!(failed.unsafe_run_sync(), Ok(Either::Left("e")));
    ///
    /// let fine = Effect::<_, &str>::pure(1).attempt();
    /// assert_eq!(fine.unsafe_run_sync(), Ok(Either::Right(1)));
    /// ```
    pub fn attempt(self) -> Effect<Either<E, A>, E> {
        Effect::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: BindFrame::Redeem {
                ok: Box::new(|value| Node::Pure(boxed(Either::<E, A>::Right(unbox::<A>(value))))),
                err: Box::new(|error| Node::Pure(boxed(Either::<E, A>::Left(error)))),
            },
        })
    }

    /// Recover from a failure with a new effect.
    ///
    /// Compiles into a single bind frame: the run loop skips it when a
    /// value flows past and consumes it when an error does.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::<i32, String>::raise_error("boom".into())
    ///     .or_else(|_| Effect::pure(7));
    /// assert_eq!(effect.unsafe_run_sync(), Ok(7));
    /// ```
    pub fn or_else<F>(self, f: F) -> Self
    where
        F: FnOnce(E) -> Effect<A, E> + Send + 'static,
    {
        Effect::from_node(Node::Bind {
            source: Box::new(self.node),
            frame: BindFrame::Recover(Box::new(move |error| f(error).into_node())),
        })
    }

    /// Transform the error value.
    pub fn map_err<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + fmt::Debug + 'static,
        E: fmt::Debug,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        let node = self.node;
        Effect::from_node(Node::Async {
            register: Box::new(move |conn, completion| {
                runloop::start_cancelable(
                    node,
                    conn.clone(),
                    Box::new(move |result| completion.complete(result.map_err(f))),
                );
            }),
        })
    }

    /// Transform both channels at once.
    pub fn bimap<B, E2, FE, FA>(self, on_err: FE, on_ok: FA) -> Effect<B, E2>
    where
        B: Send + 'static,
        E2: Send + fmt::Debug + 'static,
        E: fmt::Debug,
        FE: FnOnce(E) -> E2 + Send + 'static,
        FA: FnOnce(A) -> B + Send + 'static,
    {
        self.map(on_ok).map_err(on_err)
    }

    /// Sequence another effect and pair both results.
    pub fn product<B>(self, other: Effect<B, E>) -> Effect<(A, B), E>
    where
        B: Send + 'static,
    {
        self.and_then(move |a| other.map(move |b| (a, b)))
    }

    /// Perform a side effect and return the original value.
    ///
    /// If the side effect fails, the whole computation fails.
    pub fn tap<F>(self, f: F) -> Self
    where
        A: Clone,
        F: FnOnce(&A) -> Effect<(), E> + Send + 'static,
    {
        self.and_then(move |value| {
            let keep = value.clone();
            f(&value).map(move |_| keep)
        })
    }

    /// Discard the success value.
    pub fn void(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    /// Run the effect, delivering the outcome to `cb` exactly once.
    ///
    /// The run is not cancelable. `cb` fires on whichever thread observes
    /// the terminal event, which for a fully synchronous effect is the
    /// calling thread, before this function returns.
    pub fn unsafe_run_async<F>(self, cb: F)
    where
        E: fmt::Debug,
        F: FnOnce(Result<A, E>) + Send + 'static,
    {
        runloop::start(
            self.node,
            Box::new(move |result| cb(result.map(unbox::<A>))),
        );
    }

    /// Run the effect cancelably.
    ///
    /// Returns the cancel token as an effect: interpreting it signals the
    /// run's connection and completes once every cancel hook has finished.
    /// Canceling is idempotent; after a cancel the run's callback never
    /// fires (unless the computation converts the cancel itself, see
    /// [`on_cancel_raise_error`](Effect::on_cancel_raise_error)).
    pub fn unsafe_run_cancelable<F>(self, cb: F) -> Effect<(), E>
    where
        E: fmt::Debug,
        F: FnOnce(Result<A, E>) + Send + 'static,
    {
        let conn = Connection::cancelable();
        runloop::start_cancelable(
            self.node,
            conn.clone(),
            Box::new(move |result| cb(result.map(unbox::<A>))),
        );
        Effect::from_node(Node::Async {
            register: Box::new(move |_conn, completion| {
                conn.cancel_with(Box::new(move || completion.complete(Ok(boxed(())))));
            }),
        })
    }

    /// Run the effect on the calling thread, blocking on asynchronous
    /// boundaries until the outcome is available.
    ///
    /// # Panics
    ///
    /// Panics if the effect can be proven to never complete (its completion
    /// handle was dropped unfired); a genuinely pending wait blocks
    /// forever, as it must.
    pub fn unsafe_run_sync(self) -> Result<A, E>
    where
        E: fmt::Debug,
    {
        runloop::run_sync(self.node).map(unbox::<A>)
    }

    /// Like [`unsafe_run_sync`](Effect::unsafe_run_sync), but each
    /// *individual* asynchronous wait is bounded by `limit`.
    ///
    /// Note the scope of the bound: it is per async boundary, **not** a
    /// total-run timeout: a chain of three sleeps of 60ms each completes
    /// under a 100ms limit. Callers wanting a total timeout should [`race`]
    /// the effect against a timer-driven sleep.
    ///
    /// [`race`]: crate::race
    pub fn unsafe_run_timed(self, limit: Duration) -> Option<Result<A, E>>
    where
        E: fmt::Debug,
    {
        runloop::run_timed(self.node, limit).map(|result| result.map(unbox::<A>))
    }
}

impl<A, E> Effect<Effect<A, E>, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Flatten one level of nesting.
    pub fn flatten(self) -> Effect<A, E> {
        self.and_then(|inner| inner)
    }
}

impl<A> Effect<A, Fault>
where
    A: Send + 'static,
{
    /// [`delay`](Effect::delay) with the identity fault conversion, for
    /// effects that surface host panics directly.
    pub fn delay_catching<F>(thunk: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Effect::delay(thunk, |fault| fault)
    }
}

impl<E: Send + 'static> Effect<(), E> {
    /// The unit effect.
    pub fn unit() -> Self {
        Effect::pure(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_msg(fault: Fault) -> String {
        fault.to_string()
    }

    #[test]
    fn pure_delivers_the_value() {
        assert_eq!(Effect::<_, String>::pure(42).unsafe_run_sync(), Ok(42));
    }

    #[test]
    fn raise_error_delivers_the_error() {
        assert_eq!(
            Effect::<i32, _>::raise_error("boom").unsafe_run_sync(),
            Err("boom")
        );
    }

    #[test]
    fn delay_runs_the_thunk_per_interpretation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let runs = runs.clone();
            let effect =
                Effect::delay(move || runs.fetch_add(1, Ordering::SeqCst), to_msg);
            effect.unsafe_run_sync().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delay_converts_panics_through_err_map() {
        let effect: Effect<i32, String> = Effect::delay(|| panic!("thunk blew up"), to_msg);
        assert_eq!(effect.unsafe_run_sync(), Err("thunk blew up".to_string()));
    }

    #[test]
    fn map_and_and_then_compose() {
        let effect = Effect::<_, String>::pure(2)
            .map(|x| x * 3)
            .and_then(|x| Effect::pure(x + 4))
            .map(|x| x * 2);
        assert_eq!(effect.unsafe_run_sync(), Ok(20));
    }

    #[test]
    fn errors_short_circuit_plain_frames() {
        let effect = Effect::<i32, _>::raise_error("stop")
            .map(|x| x + 1)
            .and_then(|x| Effect::pure(x * 2));
        assert_eq!(effect.unsafe_run_sync(), Err("stop"));
    }

    #[test]
    fn or_else_recovers() {
        let effect =
            Effect::<i32, String>::raise_error("e".into()).or_else(|_| Effect::pure(9));
        assert_eq!(effect.unsafe_run_sync(), Ok(9));
    }

    #[test]
    fn or_else_is_transparent_for_values() {
        let effect = Effect::<_, String>::pure(1)
            .or_else(|_| Effect::pure(100))
            .map(|x| x + 1);
        assert_eq!(effect.unsafe_run_sync(), Ok(2));
    }

    #[test]
    fn attempt_materialises_both_sides() {
        assert_eq!(
            Effect::<i32, &str>::raise_error("e").attempt().unsafe_run_sync(),
            Ok(Either::Left("e"))
        );
        assert_eq!(
            Effect::<_, &str>::pure(3).attempt().unsafe_run_sync(),
            Ok(Either::Right(3))
        );
    }

    #[test]
    fn map_err_transforms_the_error() {
        let effect = Effect::<i32, &str>::raise_error("raw").map_err(|e| format!("wrapped: {}", e));
        assert_eq!(effect.unsafe_run_sync(), Err("wrapped: raw".to_string()));
    }

    #[test]
    fn map_err_leaves_values_alone() {
        let effect = Effect::<_, &str>::pure(1).map_err(|e| e.to_string());
        assert_eq!(effect.unsafe_run_sync(), Ok(1));
    }

    #[test]
    fn bimap_touches_the_active_channel() {
        let ok = Effect::<_, &str>::pure(2).bimap(|e| e.len(), |x| x * 10);
        assert_eq!(ok.unsafe_run_sync(), Ok(20));
        let err = Effect::<i32, &str>::raise_error("ab").bimap(|e| e.len(), |x| x * 10);
        assert_eq!(err.unsafe_run_sync(), Err(2));
    }

    #[test]
    fn product_pairs_in_order() {
        let effect = Effect::<_, String>::pure(1).product(Effect::pure("two"));
        assert_eq!(effect.unsafe_run_sync(), Ok((1, "two")));
    }

    #[test]
    fn from_either_and_from_option() {
        assert_eq!(
            Effect::from_either(Either::<&str, i32>::Right(1)).unsafe_run_sync(),
            Ok(1)
        );
        assert_eq!(
            Effect::from_either(Either::<&str, i32>::Left("e")).unsafe_run_sync(),
            Err("e")
        );
        assert_eq!(
            Effect::<i32, &str>::from_option(None, || "missing").unsafe_run_sync(),
            Err("missing")
        );
    }

    #[test]
    fn flatten_collapses_nesting() {
        let nested = Effect::<_, String>::pure(Effect::pure(5));
        assert_eq!(nested.flatten().unsafe_run_sync(), Ok(5));
    }

    #[test]
    fn async_delivers_from_another_thread() {
        let effect: Effect<i32, String> = Effect::async_(|cb| {
            std::thread::spawn(move || cb.complete(Ok(11)));
        });
        assert_eq!(effect.unsafe_run_sync(), Ok(11));
    }

    #[test]
    fn async_first_completion_wins() {
        let effect: Effect<i32, String> = Effect::async_(|cb| {
            cb.complete(Ok(1));
            cb.complete(Ok(2));
        });
        assert_eq!(effect.unsafe_run_sync(), Ok(1));
    }

    #[test]
    fn run_timed_bounds_an_individual_wait() {
        let effect: Effect<i32, String> = Effect::async_(|_cb_held_elsewhere| {
            // registration keeps the callback alive but never fires it
            std::mem::forget(_cb_held_elsewhere);
        });
        assert_eq!(effect.unsafe_run_timed(Duration::from_millis(20)), None);
    }

    #[test]
    fn run_timed_returns_sync_results() {
        let effect = Effect::<_, String>::pure(1).map(|x| x + 1);
        assert_eq!(
            effect.unsafe_run_timed(Duration::from_millis(1)),
            Some(Ok(2))
        );
    }

    #[test]
    fn unsafe_run_async_fires_once() {
        use std::sync::mpsc;
        let (tx, rx) = mpsc::channel();
        Effect::<_, String>::pure(7).unsafe_run_async(move |r| tx.send(r).unwrap());
        assert_eq!(rx.recv().unwrap(), Ok(7));
    }

    #[test]
    fn debug_shows_the_node_shape() {
        let effect = Effect::<_, String>::pure(1).map(|x| x + 1);
        assert_eq!(format!("{:?}", effect), "Effect(\"Map\")");
    }
}
