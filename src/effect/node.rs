//! The erased effect algebra interpreted by the run loop.
//!
//! [`Effect`](crate::Effect) is a thin typed wrapper around `Node<E>`, where
//! values travel as `Box<dyn Any + Send>`. Constructors box, delivery
//! unboxes; the pairing is guaranteed by construction, which is what lets a
//! single interpreter walk heterogeneous bind chains without a recursive
//! type.

use std::any::Any;
use std::panic::resume_unwind;

use crate::effect::callback::Completion;
use crate::effect::connection::Connection;
use crate::fault::Fault;
use crate::report;

pub(crate) type Value = Box<dyn Any + Send>;
pub(crate) type Thunk = Box<dyn FnOnce() -> Value + Send>;
pub(crate) type NodeThunk<E> = Box<dyn FnOnce() -> Node<E> + Send>;
pub(crate) type ErrMap<E> = Box<dyn FnOnce(Fault) -> E + Send>;
pub(crate) type Cont<E> = Box<dyn FnOnce(Value) -> Node<E> + Send>;
pub(crate) type ErrCont<E> = Box<dyn FnOnce(E) -> Node<E> + Send>;
pub(crate) type MapFn = Box<dyn FnOnce(Value) -> Value + Send>;
pub(crate) type RegisterFn<E> = Box<dyn FnOnce(&Connection, Completion<E>) + Send>;

/// Cap on consecutively fused `Map` transforms. Composing closures nests
/// them on the host stack when finally applied, so fusion resets past this
/// depth.
pub(crate) const FUSION_MAX_DEPTH: u16 = 127;

/// The closed set of effect shapes.
pub(crate) enum Node<E> {
    Pure(Value),
    RaiseError(E),
    Delay { thunk: Thunk, err_map: ErrMap<E> },
    Suspend { thunk: NodeThunk<E>, err_map: ErrMap<E> },
    Bind { source: Box<Node<E>>, frame: BindFrame<E> },
    Map { source: Box<Node<E>>, f: MapFn, depth: u16 },
    Async { register: RegisterFn<E> },
}

/// A captured continuation waiting on the bind stack.
///
/// `Recover` is transparent for value delivery (its success branch is the
/// identity, so the run loop skips it) and opaque for error delivery.
/// `Redeem` carries a real branch for both paths.
pub(crate) enum BindFrame<E> {
    Plain(Cont<E>),
    Recover(ErrCont<E>),
    Redeem { ok: Cont<E>, err: ErrCont<E> },
}

impl<E> Node<E> {
    pub(crate) fn pure_unit() -> Self {
        Node::Pure(boxed(()))
    }

    /// An effect that never completes: its registration drops the callback.
    pub(crate) fn never() -> Self {
        Node::Async {
            register: Box::new(|_conn, _cb| {}),
        }
    }

    pub(crate) fn tag(&self) -> &'static str {
        match self {
            Node::Pure(_) => "Pure",
            Node::RaiseError(_) => "RaiseError",
            Node::Delay { .. } => "Delay",
            Node::Suspend { .. } => "Suspend",
            Node::Bind { .. } => "Bind",
            Node::Map { .. } => "Map",
            Node::Async { .. } => "Async",
        }
    }
}

#[inline]
pub(crate) fn boxed<A: Send + 'static>(value: A) -> Value {
    Box::new(value)
}

/// Unbox an erased value. The typed wrapper boxed it from `A`, so the
/// downcast cannot fail for well-formed trees.
#[inline]
pub(crate) fn unbox<A: 'static>(value: Value) -> A {
    *value
        .downcast::<A>()
        .expect("erased effect value did not have the constructed type")
}

/// An `err_map` for runtime-internal thunks, which have no sensible typed
/// conversion: the fault is reported and unwinding resumes.
pub(crate) fn fatal_err_map<E: 'static>() -> ErrMap<E> {
    Box::new(|fault: Fault| {
        report::report_failure(&fault);
        resume_unwind(fault.into_payload())
    })
}
