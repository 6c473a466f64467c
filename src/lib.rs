//! autograder: a test-execution and result-reporting engine for grading student programs.
//!
//! Graders register named test cases grouped into categories. The engine runs
//! them in registration order with optional per-test timeouts, isolating each
//! test on a worker thread or in a child process so that a hang or crash in
//! student code is recorded as a failure instead of stopping the run. Results
//! are reported to a console or a graphical panel model.
//!
//! # Quick Start
//!
//! ```no_run
//! use autograder::{Config, builder};
//!
//! # fn main() -> autograder::Result<()> {
//! let grader = builder()
//!     .with_config(Config::default())
//!     .test("Basic", "addition", 1000, |ctx| {
//!         ctx.assert_equals("2 + 2", 4, 2 + 2);
//!         Ok(())
//!     })
//!     .build()?;
//! let status = grader.main_func()?;
//! std::process::exit(status);
//! # }
//! ```
//!
//! ## Configuration in autograder.toml
//!
//! ```toml
//! [grader]
//! assignment-name = "Game of Life"
//! start-message = "Note: tests may take a minute."
//!
//! [runner]
//! default-timeout-ms = 5000
//! isolation = "thread"
//!
//! [report]
//! fails-to-print-per-test = 1
//!
//! [[style-check]]
//! file = "life.cpp"
//! rules = "stylecheck-life-cpp.toml"
//! ```
//!
//! # Architecture
//!
//! The library is built around three seams:
//!
//! - [`Executor`](runner::Executor): runs one test body (inline, thread, or process)
//! - [`Reporter`](reporter::Reporter): receives start, detail, end, and summary events
//! - [`StyleChecker`](style::StyleChecker): checks source files against rule files
//!
//! Every outcome goes through [`ResultBoard`](results::ResultBoard), which applies
//! the sticky-failure rule: once a test fails, later passing assertions never
//! turn it back to a pass.
//!
//! # Student exits
//!
//! Student code calls [`exit`] rather than `std::process::exit`. During a run
//! the call is intercepted and reported as a failure of the current test.

pub mod capture;
pub mod config;
pub mod core;
pub mod exit;
pub mod late_days;
pub mod outcome;
pub mod registry;
pub mod reporter;
pub mod results;
pub mod runner;
pub mod style;

// Re-export commonly used types
pub use crate::capture::Console;
pub use crate::core::{
    Autograder, AutograderBuilder, Error, Result, RunContext, TestContext, TestError,
};
pub use config::{Config, Isolation};
pub use exit::exit;
pub use outcome::{RunAggregate, Verdict};
pub use registry::TestRegistry;

/// Create a new autograder builder.
///
/// This is the main entry point for the fluent API.
pub fn builder() -> AutograderBuilder {
    AutograderBuilder::new()
}
