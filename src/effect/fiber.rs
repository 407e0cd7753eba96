//! Fibers: handles to detached runs.
//!
//! [`Effect::start`] begins interpreting an effect on a fresh cancelable
//! connection and immediately yields a [`Fiber`], a pair of `join` (await
//! the outcome) and `cancel` (signal the connection). The spawned run makes
//! synchronous progress on the starting thread until its first asynchronous
//! boundary; `start` itself introduces no boundary, so callers wanting one
//! sequence a shift first.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::effect::connection::Connection;
use crate::effect::node::{boxed, unbox, Node};
use crate::effect::runloop;
use crate::effect::Effect;

/// A handle to a concurrently executing effect.
///
/// Joiners receive clones of the outcome; the one-shot completion slot
/// keeps the original so late joiners observe the same result.
pub struct Fiber<A, E> {
    slot: Arc<Slot<A, E>>,
    conn: Connection,
}

impl<A, E> Clone for Fiber<A, E> {
    fn clone(&self) -> Self {
        Fiber {
            slot: self.slot.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl<A, E> fmt::Debug for Fiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("completed", &self.slot.is_done())
            .finish()
    }
}

impl<A, E> Fiber<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + fmt::Debug + 'static,
{
    pub(crate) fn new(slot: Arc<Slot<A, E>>, conn: Connection) -> Self {
        Fiber { slot, conn }
    }

    /// Await the fiber's final outcome.
    ///
    /// Delivers synchronously when the fiber already finished; otherwise
    /// installs a listener on the completion slot. Joining a canceled fiber
    /// never completes.
    pub fn join(&self) -> Effect<A, E> {
        let slot = self.slot.clone();
        Effect::from_node(Node::Async {
            register: Box::new(move |_conn, completion| {
                slot.on_complete(Box::new(move |result| {
                    completion.complete(result.map(boxed));
                }));
            }),
        })
    }

    /// Signal the fiber's connection.
    ///
    /// Completes once every cancel hook has finished. Canceling twice is
    /// the same as canceling once.
    pub fn cancel(&self) -> Effect<(), E> {
        let conn = self.conn.clone();
        Effect::from_node(Node::Async {
            register: Box::new(move |_conn, completion| {
                conn.cancel_with(Box::new(move || completion.complete(Ok(boxed(())))));
            }),
        })
    }
}

impl<A, E> Effect<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + fmt::Debug + 'static,
{
    /// Begin a detached run of this effect, yielding its [`Fiber`].
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::Effect;
    ///
    /// let effect = Effect::<_, String>::pure(2)
    ///     .start()
    ///     .and_then(|fiber| fiber.join());
    /// assert_eq!(effect.unsafe_run_sync(), Ok(2));
    /// ```
    pub fn start(self) -> Effect<Fiber<A, E>, E> {
        let node = self.into_node();
        Effect::from_node(Node::Async {
            register: Box::new(move |_conn, completion| {
                let conn = Connection::cancelable();
                let slot = Arc::new(Slot::new());
                {
                    let slot = slot.clone();
                    runloop::start_cancelable(
                        node,
                        conn.clone(),
                        Box::new(move |result| slot.complete(result.map(unbox::<A>))),
                    );
                }
                completion.complete(Ok(boxed(Fiber::new(slot, conn))));
            }),
        })
    }
}

type Listener<A, E> = Box<dyn FnOnce(Result<A, E>) + Send>;

/// One-shot completion slot with listeners.
pub(crate) struct Slot<A, E> {
    state: Mutex<SlotState<A, E>>,
}

enum SlotState<A, E> {
    Pending(Vec<Listener<A, E>>),
    Done(Result<A, E>),
}

impl<A, E> Slot<A, E> {
    pub(crate) fn new() -> Self {
        Slot {
            state: Mutex::new(SlotState::Pending(Vec::new())),
        }
    }

    fn is_done(&self) -> bool {
        matches!(*self.state.lock().unwrap(), SlotState::Done(_))
    }
}

impl<A, E> Slot<A, E>
where
    A: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Record the outcome and fire pending listeners. Only the first
    /// completion counts.
    pub(crate) fn complete(&self, result: Result<A, E>) {
        let listeners = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                SlotState::Done(_) => return,
                SlotState::Pending(pending) => {
                    let listeners = std::mem::take(pending);
                    *state = SlotState::Done(result.clone());
                    listeners
                }
            }
        };
        for listener in listeners {
            listener(result.clone());
        }
    }

    /// Observe the outcome: immediately if present, otherwise when it
    /// arrives.
    pub(crate) fn on_complete(&self, listener: Listener<A, E>) {
        let immediate = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                SlotState::Done(result) => Some((listener, result.clone())),
                SlotState::Pending(pending) => {
                    pending.push(listener);
                    None
                }
            }
        };
        if let Some((listener, result)) = immediate {
            listener(result);
        }
    }
}
