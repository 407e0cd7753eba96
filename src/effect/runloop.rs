//! The trampolined interpreter.
//!
//! One engine interprets every effect. The bind stack is explicit data (a
//! cached head frame plus a lazily allocated vector), so sequencing depth
//! never touches the host stack. `Async` is the only suspension point:
//! interpretation stops, the engine's state moves into a reusable restart
//! callback, and the external registration resumes the loop when (and if)
//! the event fires.
//!
//! Error propagation walks the same stack leftward: plain frames are
//! dropped, the first handler frame consumes the error. A run that raises
//! with no handler left delivers `Err` to its terminal callback.

use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::effect::callback::{Complete, Completion, DoneFn};
use crate::effect::connection::Connection;
use crate::effect::node::{BindFrame, Cont, ErrCont, Node, RegisterFn, Value};
use crate::fault::Fault;
use crate::report;
use crate::trampoline;

/// Interpreter state for one run.
pub(crate) struct Engine<E> {
    conn: Connection,
    b_first: Option<BindFrame<E>>,
    b_rest: Vec<BindFrame<E>>,
    restart: Option<Arc<Restart<E>>>,
}

/// Outcome of interpreting until a result or the first suspension.
pub(crate) enum LoopStep<E> {
    Done(Result<Value, E>),
    Suspend(RegisterFn<E>),
}

impl<E: Send + fmt::Debug + 'static> Engine<E> {
    fn new(conn: Connection) -> Self {
        Engine {
            conn,
            b_first: None,
            b_rest: Vec::new(),
            restart: None,
        }
    }

    fn push_frame(&mut self, frame: BindFrame<E>) {
        if let Some(prev) = self.b_first.take() {
            self.b_rest.push(prev);
        }
        self.b_first = Some(frame);
    }

    fn next_frame(&mut self) -> Option<BindFrame<E>> {
        self.b_first.take().or_else(|| self.b_rest.pop())
    }

    /// Next continuation for a value. Recover frames are transparent here.
    fn pop_for_value(&mut self) -> Option<Cont<E>> {
        loop {
            match self.next_frame()? {
                BindFrame::Plain(k) => return Some(k),
                BindFrame::Recover(_) => continue,
                BindFrame::Redeem { ok, .. } => return Some(ok),
            }
        }
    }

    /// Next handler for an error. Plain frames are dropped here.
    fn pop_for_error(&mut self) -> Option<ErrCont<E>> {
        loop {
            match self.next_frame()? {
                BindFrame::Plain(_) => continue,
                BindFrame::Recover(h) => return Some(h),
                BindFrame::Redeem { err, .. } => return Some(err),
            }
        }
    }

    /// Interpret synchronously until a terminal result or the first `Async`
    /// node. The bind stack survives across calls, which is what lets the
    /// synchronous drivers resume after feeding an async result back in.
    fn interpret(&mut self, mut current: Node<E>) -> LoopStep<E> {
        loop {
            current = match current {
                Node::Bind { source, frame } => {
                    self.push_frame(frame);
                    *source
                }
                Node::Map { source, f, .. } => {
                    self.push_frame(BindFrame::Plain(Box::new(move |value| {
                        Node::Pure(f(value))
                    })));
                    *source
                }
                Node::Pure(value) => match self.pop_for_value() {
                    None => return LoopStep::Done(Ok(value)),
                    Some(k) => call_protected(move || k(value)),
                },
                Node::Delay { thunk, err_map } => {
                    match catch_unwind(AssertUnwindSafe(thunk)) {
                        Ok(value) => match self.pop_for_value() {
                            None => return LoopStep::Done(Ok(value)),
                            Some(k) => call_protected(move || k(value)),
                        },
                        Err(payload) => Node::RaiseError(call_protected(move || {
                            err_map(Fault::new(payload))
                        })),
                    }
                }
                Node::Suspend { thunk, err_map } => match catch_unwind(AssertUnwindSafe(thunk)) {
                    Ok(node) => node,
                    Err(payload) => {
                        Node::RaiseError(call_protected(move || err_map(Fault::new(payload))))
                    }
                },
                Node::RaiseError(error) => match self.pop_for_error() {
                    None => return LoopStep::Done(Err(error)),
                    Some(handler) => call_protected(move || handler(error)),
                },
                Node::Async { register } => return LoopStep::Suspend(register),
            };
        }
    }
}

/// Reusable restart callback.
///
/// While the run is suspended it owns the engine and terminal callback; the
/// engine's own handle to it is cleared first, so an abandoned registration
/// drops the whole run instead of leaking a reference cycle. At most one
/// resume goes through; a second delivery carrying an error is reported.
struct Restart<E> {
    state: Mutex<RestartState<E>>,
}

struct RestartState<E> {
    can_call: bool,
    armed: Option<(Engine<E>, DoneFn<E>)>,
}

impl<E> Restart<E> {
    fn new() -> Self {
        Restart {
            state: Mutex::new(RestartState {
                can_call: false,
                armed: None,
            }),
        }
    }

    fn arm(&self, engine: Engine<E>, done: DoneFn<E>) {
        let mut state = self.state.lock().unwrap();
        state.can_call = true;
        state.armed = Some((engine, done));
    }
}

impl<E: Send + fmt::Debug + 'static> Complete<E> for Restart<E> {
    fn complete(self: Arc<Self>, result: Result<Value, E>) {
        trampoline::execute(Box::new(move || {
            let armed = {
                let mut state = self.state.lock().unwrap();
                if state.can_call {
                    state.can_call = false;
                    state.armed.take()
                } else {
                    None
                }
            };
            match armed {
                Some((mut engine, done)) => {
                    engine.restart = Some(Arc::clone(&self));
                    let current = match result {
                        Ok(value) => Node::Pure(value),
                        Err(error) => Node::RaiseError(error),
                    };
                    drive(engine, current, done);
                }
                None => {
                    if let Err(error) = result {
                        report::report_failure(&("restart after delivery dropped an error", error));
                    }
                }
            }
        }));
    }
}

/// Begin an uncancelable run.
pub(crate) fn start<E: Send + fmt::Debug + 'static>(node: Node<E>, done: DoneFn<E>) {
    drive(Engine::new(Connection::uncancelable()), node, done);
}

/// Begin a run scoped to `conn`.
pub(crate) fn start_cancelable<E: Send + fmt::Debug + 'static>(
    node: Node<E>,
    conn: Connection,
    done: DoneFn<E>,
) {
    drive(Engine::new(conn), node, done);
}

fn drive<E: Send + fmt::Debug + 'static>(mut engine: Engine<E>, node: Node<E>, done: DoneFn<E>) {
    match engine.interpret(node) {
        LoopStep::Done(result) => done(result),
        LoopStep::Suspend(register) => {
            let conn = engine.conn.clone();
            let restart = engine
                .restart
                .take()
                .unwrap_or_else(|| Arc::new(Restart::new()));
            restart.arm(engine, done);
            let completion = Completion::from_target(restart);
            register(&conn, completion);
        }
    }
}

/// Drive a run on the calling thread, blocking on each async boundary.
pub(crate) fn run_sync<E: Send + fmt::Debug + 'static>(node: Node<E>) -> Result<Value, E> {
    let mut engine = Engine::new(Connection::uncancelable());
    let mut current = node;
    loop {
        match engine.interpret(current) {
            LoopStep::Done(result) => return result,
            LoopStep::Suspend(register) => {
                let (tx, rx) = mpsc::channel();
                let completion = Completion::from_done(Box::new(move |result| {
                    let _ = tx.send(result);
                }));
                let conn = engine.conn.clone();
                register(&conn, completion);
                match rx.recv() {
                    Ok(result) => current = resumed(result),
                    Err(_) => panic!(
                        "unsafe_run_sync: the effect will never complete \
                         (its callback was dropped without being invoked)"
                    ),
                }
            }
        }
    }
}

/// Like [`run_sync`], but each individual async wait is bounded by `limit`.
/// Returns `None` on the first wait that exceeds it.
pub(crate) fn run_timed<E: Send + fmt::Debug + 'static>(
    node: Node<E>,
    limit: Duration,
) -> Option<Result<Value, E>> {
    let mut engine = Engine::new(Connection::uncancelable());
    let mut current = node;
    loop {
        match engine.interpret(current) {
            LoopStep::Done(result) => return Some(result),
            LoopStep::Suspend(register) => {
                let (tx, rx) = mpsc::channel();
                let completion = Completion::from_done(Box::new(move |result| {
                    let _ = tx.send(result);
                }));
                let conn = engine.conn.clone();
                let deadline = Instant::now() + limit;
                register(&conn, completion);
                match rx.recv_timeout(limit) {
                    Ok(result) => current = resumed(result),
                    Err(mpsc::RecvTimeoutError::Timeout) => return None,
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        // the callback can no longer fire; honour the wait
                        // bound before giving up
                        let now = Instant::now();
                        if deadline > now {
                            std::thread::sleep(deadline - now);
                        }
                        return None;
                    }
                }
            }
        }
    }
}

fn resumed<E>(result: Result<Value, E>) -> Node<E> {
    match result {
        Ok(value) => Node::Pure(value),
        Err(error) => Node::RaiseError(error),
    }
}

/// Invoke a user continuation. A panic here is a programming bug, not a
/// typed failure: it is reported to the sink and unwinding resumes, escaping
/// the run loop.
pub(crate) fn call_protected<R>(f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let fault = Fault::new(payload);
            report::report_failure(&("continuation raised a host fault", &fault));
            resume_unwind(fault.into_payload())
        }
    }
}
