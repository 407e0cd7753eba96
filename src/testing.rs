//! Test support.
//!
//! The runtime routes unpropagatable failures (losing-race errors, release
//! failures, duplicate callbacks) to the sink. [`CaptureReporter`] makes
//! that stream observable from tests.
//!
//! The reporter is installed process-wide, so tests sharing a binary also
//! share the capture buffer; assert on message fragments unique to the
//! test rather than on entry counts of the whole buffer.
//!
//! ```
//! use millrace::testing::CaptureReporter;
//! use millrace::Effect;
//!
//! let reporter = CaptureReporter::install();
//! let effect = Effect::<_, String>::pure(1).bracket(
//!     |v| Effect::pure(*v),
//!     |_| Effect::raise_error("release-went-bad".into()),
//! );
//! assert_eq!(effect.unsafe_run_sync(), Ok(1));
//! assert!(reporter.contains("release-went-bad"));
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use crate::report::{set_reporter, Reporter};

/// A [`Reporter`] that appends rendered failures to a buffer.
#[derive(Debug, Default)]
pub struct CaptureReporter {
    entries: Mutex<Vec<String>>,
}

static INSTALLED: OnceLock<Arc<CaptureReporter>> = OnceLock::new();

impl CaptureReporter {
    /// Install the process-wide capture reporter and return a handle to it.
    ///
    /// Idempotent: every call returns the same instance.
    pub fn install() -> Arc<CaptureReporter> {
        INSTALLED
            .get_or_init(|| {
                let reporter = Arc::new(CaptureReporter::default());
                set_reporter(reporter.clone());
                reporter
            })
            .clone()
    }

    /// Everything captured so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// True if some captured entry contains `fragment`.
    pub fn contains(&self, fragment: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|entry| entry.contains(fragment))
    }

    /// How many captured entries contain `fragment`.
    pub fn count_containing(&self, fragment: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.contains(fragment))
            .count()
    }
}

impl Reporter for CaptureReporter {
    fn report_failure(&self, failure: &dyn fmt::Debug) {
        self.entries.lock().unwrap().push(format!("{:?}", failure));
    }
}
