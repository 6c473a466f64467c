//! Reporter trait and the events the runner delivers to it.
//!
//! The runner only talks to a [`Reporter`]; the console and graphical backends
//! are interchangeable implementations.

use crate::outcome::{RunAggregate, TestOutcome};
use crate::registry::TestDescriptor;
use crate::results::TestRecord;
use crate::style::StyleReport;
use serde::{Deserialize, Serialize};

pub mod console;
pub mod graphical;

pub use console::ConsoleReporter;
pub use graphical::{GraphicalReporter, NullSink, PanelModel, UiSink};

/// Identity of a test as seen by reporters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestInfo {
    /// 1-based position in the run.
    pub index: usize,
    pub category: String,
    pub name: String,
    pub full_name: String,
    pub timeout_ms: u64,
}

impl TestInfo {
    pub fn from_descriptor(index: usize, test: &TestDescriptor) -> Self {
        Self {
            index,
            category: test.category().to_string(),
            name: test.name().to_string(),
            full_name: test.full_name().to_string(),
            timeout_ms: test.timeout_ms(),
        }
    }
}

/// Receives grading events in the order the runner produces them.
///
/// `on_detail` may also be called from a test thread the runner has already
/// abandoned, after the next test started; implementations must tolerate that.
pub trait Reporter: Send + Sync {
    /// A run is about to execute `selected` tests.
    fn on_run_start(&self, selected: usize) {
        let _ = selected;
    }

    fn on_test_start(&self, info: &TestInfo);

    /// An assertion or synthesized event produced an outcome.
    fn on_detail(&self, info: &TestInfo, outcome: &TestOutcome);

    fn on_test_end(&self, info: &TestInfo, record: &TestRecord);

    fn on_summary(&self, aggregate: &RunAggregate);

    /// Previous results are being discarded before a new run.
    fn on_clear(&self) {}

    /// Style check results for one source file.
    ///
    /// `merged` asks for the checks to be shown alongside the unit tests.
    fn on_style_check(&self, report: &StyleReport, merged: bool) {
        let _ = (report, merged);
    }

    /// Get a human-readable name for this reporter.
    fn name(&self) -> &str;
}
