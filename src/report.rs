//! The failure sink.
//!
//! Some failures have no propagation path: the error of a race's losing
//! branch, a resource release that fails after the primary outcome is
//! already decided, a completion callback invoked a second time. Those must
//! never be silently dropped, so they are routed here.
//!
//! By default failures are logged through `tracing` (or `eprintln!` when the
//! `tracing` feature is disabled). A custom [`Reporter`] can be installed
//! process-wide with [`set_reporter`], which tests use to observe reported
//! failures.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, RwLock};

/// Receives failures that cannot propagate through an effect's error channel.
///
/// Implementations must not block and must not panic; a panicking reporter
/// is contained and its panic discarded, since there is nowhere left to
/// report it.
pub trait Reporter: Send + Sync {
    /// Record a failure. Must not block or panic.
    fn report_failure(&self, failure: &dyn fmt::Debug);
}

static REPORTER: OnceLock<RwLock<Option<Arc<dyn Reporter>>>> = OnceLock::new();

fn cell() -> &'static RwLock<Option<Arc<dyn Reporter>>> {
    REPORTER.get_or_init(|| RwLock::new(None))
}

/// Install a process-wide reporter, replacing any previous one.
pub fn set_reporter(reporter: Arc<dyn Reporter>) {
    let mut slot = cell().write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(reporter);
}

/// Route a failure to the installed reporter, or to the default log sink.
pub(crate) fn report_failure(failure: &dyn fmt::Debug) {
    let installed = cell().read().unwrap_or_else(|e| e.into_inner()).clone();
    match installed {
        Some(reporter) => {
            let _ = catch_unwind(AssertUnwindSafe(|| reporter.report_failure(failure)));
        }
        None => {
            #[cfg(feature = "tracing")]
            tracing::error!(failure = ?failure, "failure reported to sink");
            #[cfg(not(feature = "tracing"))]
            eprintln!("failure reported to sink: {:?}", failure);
        }
    }
}
