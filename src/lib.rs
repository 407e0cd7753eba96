//! # Millrace
//!
//! A trampolined effect runtime: programs are written as pure, first-class
//! *descriptions* of synchronous and asynchronous computations, and a
//! single interpreter runs those descriptions with stack-safe sequencing,
//! typed error propagation, cooperative cancellation, bracket resource
//! safety, and concurrent racing.
//!
//! ## Quick example
//!
//! ```
//! use millrace::Effect;
//!
//! let program = Effect::<_, String>::pure(20)
//!     .map(|x| x * 2)
//!     .and_then(|x| Effect::pure(x + 2));
//!
//! assert_eq!(program.unsafe_run_sync(), Ok(42));
//! ```
//!
//! ## What lives where
//!
//! - [`Effect`]: the effect type with constructors, combinators, and the
//!   `unsafe_run_*` execution boundary.
//! - [`race`] / [`race_pair`]: two-way concurrent racing. [`Fiber`]:
//!   join/cancel handles from [`Effect::start`].
//! - [`Effect::bracket`] and [`ExitCase`]: resource safety.
//! - [`Timer`] / [`ThreadTimer`]: injected clocks and execution hops.
//! - [`Reporter`] / [`set_reporter`]: the sink for failures that have no
//!   propagation path.
//!
//! Running is the only impure part of the API, and the `unsafe_run_*`
//! naming marks that boundary: everything before it merely builds a value.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod effect;
pub mod either;
pub mod fault;
pub mod report;
pub mod testing;
pub mod timer;

pub(crate) mod trampoline;

// Re-exports
pub use effect::{race, race_pair, Callback, Effect, ExitCase, Fiber};
pub use either::Either;
pub use fault::Fault;
pub use report::{set_reporter, Reporter};
pub use timer::{ThreadTimer, Timer};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::effect::{race, race_pair, Callback, Effect, ExitCase, Fiber};
    pub use crate::either::Either;
    pub use crate::fault::Fault;
    pub use crate::report::{set_reporter, Reporter};
    pub use crate::timer::{ThreadTimer, Timer};
}
