//! Captured host faults.
//!
//! A [`Fault`] is a panic payload caught at a `delay`/`suspend` boundary.
//! Every thunk-capturing constructor takes an `err_map` converting the fault
//! into the effect's error type; which conversion makes sense is up to the
//! caller. Programs that simply want panics surfaced as-is can use `Fault`
//! itself as the error type (it is the default for [`Effect`]).
//!
//! [`Effect`]: crate::Effect

use std::any::Any;
use std::fmt;

/// A host-level fault (a panic) captured by the runtime.
///
/// # Example
///
/// ```
/// use millrace::{Effect, Fault};
///
/// let effect: Effect<i32, String> = Effect::delay(
///     || panic!("boom"),
///     |fault: Fault| fault.to_string(),
/// );
///
/// assert_eq!(effect.unsafe_run_sync(), Err("boom".to_string()));
/// ```
pub struct Fault(Box<dyn Any + Send>);

impl Fault {
    pub(crate) fn new(payload: Box<dyn Any + Send>) -> Self {
        Fault(payload)
    }

    /// The panic message, when the payload was a string.
    ///
    /// Panics raised through `panic!("...")` carry a `&str` or `String`
    /// payload; anything else renders as a placeholder.
    pub fn message(&self) -> &str {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            s.as_str()
        } else {
            "<non-string panic payload>"
        }
    }

    /// Recover the raw panic payload, e.g. to resume unwinding.
    pub fn into_payload(self) -> Box<dyn Any + Send> {
        self.0
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.message()).finish()
    }
}
