//! Test runner and the executors that isolate test bodies.
//!
//! [`TestRunner`] walks the registry in order, and hands each body to an
//! [`Executor`]. The executor reports how the body ended as an [`ExecStatus`];
//! the runner turns abnormal endings into synthesized outcomes so every
//! failure shows up through the same reporter contract as an assertion.

use crate::config::{Isolation, RunnerConfig};
use crate::capture::OutputCapture;
use crate::core::context::{RunContext, TestContext};
use crate::core::error::{Error, Result, TestError};
use crate::exit::StudentExit;
use crate::outcome::{OutcomeKind, RunAggregate, TestOutcome, Verdict};
use crate::registry::{TestDescriptor, TestRegistry};
use crate::reporter::TestInfo;
use crate::results::TestRecord;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod inline;
pub mod process;
pub mod thread;

pub use inline::InlineExecutor;
pub use process::{ChildCommand, ProcessExecutor};
pub use thread::ThreadExecutor;

/// How a test body ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "end", rename_all = "kebab-case")]
pub enum ExecStatus {
    /// The body returned normally.
    Returned,
    /// The body returned a structured error.
    Raised {
        message: String,
        stack_trace: Option<String>,
    },
    /// A hard assertion stopped the body after reporting its outcome.
    Aborted,
    /// The body panicked.
    Panicked { message: String },
    /// The body called [`crate::exit`] while exiting was disabled.
    StudentExit { status: i32 },
    /// The body did not finish within its timeout.
    TimedOut,
    /// The test process died without reporting how the body ended.
    Crashed { description: String },
}

impl ExecStatus {
    /// Classify the result of running a body under `catch_unwind`.
    ///
    /// Student exits are always converted. Other panics are re-raised on the
    /// calling thread unless `catch_exceptions` is set.
    pub fn from_body_result(
        result: std::thread::Result<std::result::Result<(), TestError>>,
        catch_exceptions: bool,
    ) -> Self {
        match result {
            Ok(Ok(())) => ExecStatus::Returned,
            Ok(Err(TestError::Aborted)) => ExecStatus::Aborted,
            Ok(Err(TestError::Raised {
                message,
                stack_trace,
            })) => ExecStatus::Raised {
                message,
                stack_trace,
            },
            Err(payload) => {
                if let Some(exit) = payload.downcast_ref::<StudentExit>() {
                    return ExecStatus::StudentExit {
                        status: exit.status,
                    };
                }
                if !catch_exceptions {
                    std::panic::resume_unwind(payload);
                }
                ExecStatus::Panicked {
                    message: panic_message(payload.as_ref()),
                }
            }
        }
    }
}

/// Extract the message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs one test body and reports how it ended.
pub trait Executor: Send + Sync {
    /// Run the body of `test`, reporting outcomes through `ctx`.
    fn execute(&self, test: &TestDescriptor, ctx: &Arc<TestContext>) -> Result<ExecStatus>;

    /// Get a human-readable name for this executor.
    fn name(&self) -> &str;
}

/// Create the executor used for tests that ask for isolation.
pub fn create_executor_from_config(
    config: &RunnerConfig,
    child: Option<ChildCommand>,
) -> Result<Box<dyn Executor>> {
    let poll = Duration::from_millis(config.poll_interval_ms.max(1));
    match config.isolation {
        Isolation::None => Ok(Box::new(InlineExecutor::new(config.catch_exceptions))),
        Isolation::Thread => Ok(Box::new(ThreadExecutor::new(poll, config.catch_exceptions))),
        Isolation::Process => {
            let command = match child {
                Some(command) => command,
                None => ChildCommand::current_exe()?,
            };
            Ok(Box::new(ProcessExecutor::new(command, poll)))
        }
    }
}

/// Executes registered tests in order and feeds the results to the reporter.
pub struct TestRunner {
    run: Arc<RunContext>,
    isolated: Box<dyn Executor>,
    inline: InlineExecutor,
}

impl TestRunner {
    /// Create a runner using the executor selected by the configuration.
    pub fn new(run: Arc<RunContext>) -> Result<Self> {
        let isolated = create_executor_from_config(&run.config().runner, None)?;
        Ok(Self::with_executor(run, isolated))
    }

    /// Create a runner with an explicit executor for isolated tests.
    pub fn with_executor(run: Arc<RunContext>, isolated: Box<dyn Executor>) -> Self {
        let inline = InlineExecutor::new(run.config().runner.catch_exceptions);
        Self {
            run,
            isolated,
            inline,
        }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.run
    }

    /// Tests that will run, in order. Each full name appears once.
    pub fn selected<'a>(&self, registry: &'a TestRegistry) -> Vec<&'a Arc<TestDescriptor>> {
        let selection = &self.run.config().selection;
        let mut seen = HashSet::new();
        registry
            .iter()
            .filter(|t| t.is_enabled() && selection.allows(t.full_name()))
            .filter(|t| seen.insert(t.full_name().to_string()))
            .collect()
    }

    /// Run every selected test and report the summary.
    pub fn run_all(&self, registry: &TestRegistry) -> Result<RunAggregate> {
        let reporter = Arc::clone(self.run.reporter()?);
        let selected = self.selected(registry);
        tracing::info!(
            tests = selected.len(),
            executor = self.isolated.name(),
            "starting test run"
        );
        reporter.on_run_start(selected.len());

        for (i, test) in selected.iter().enumerate() {
            self.run_test(i + 1, test)?;
        }

        let aggregate = self.run.board().aggregate();
        tracing::info!(
            passed = aggregate.passed,
            failed = aggregate.failed,
            warned = aggregate.warned,
            total = aggregate.total,
            "test run finished"
        );
        reporter.on_summary(&aggregate);
        Ok(aggregate)
    }

    /// Run one test as number `index` of the run.
    pub fn run_test(&self, index: usize, test: &TestDescriptor) -> Result<TestRecord> {
        let reporter = Arc::clone(self.run.reporter()?);
        let config = &self.run.config().runner;
        let info = TestInfo::from_descriptor(index, test);

        self.run.board().start(&info.full_name);
        self.run.set_current_test(Some(info.full_name.clone()));
        reporter.on_test_start(&info);
        tracing::debug!(test = %info.full_name, timeout_ms = info.timeout_ms, "running test");

        let capture = OutputCapture::with_limit(config.output_limit);
        capture.set_echo(config.echo_output);
        capture.begin(config.capture_stderr);
        let ctx = Arc::new(TestContext::new(
            info.clone(),
            Arc::clone(&self.run),
            capture.clone(),
        ));

        let executor: &dyn Executor =
            if test.run_in_own_thread() && config.isolation != Isolation::None {
                self.isolated.as_ref()
            } else {
                &self.inline
            };

        let started = Instant::now();
        let status = executor.execute(test, &ctx);
        let elapsed = started.elapsed();
        let output = capture.end();

        // Restore the shared state before anything can bail out.
        self.run.set_current_test(None);
        let status = status?;
        conclude(&ctx, &status, elapsed, capture.limit_exceeded(), config.catch_exceptions)?;

        let record = self.run.board().finish(&info.full_name, elapsed, output);
        tracing::debug!(
            test = %info.full_name,
            verdict = %record.verdict,
            elapsed_ms = record.elapsed_ms(),
            "complete"
        );
        reporter.on_test_end(&info, &record);
        Ok(record)
    }
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("isolated", &self.isolated.name())
            .finish_non_exhaustive()
    }
}

/// Report the outcome synthesized for an abnormal ending.
///
/// With `catch_exceptions` off a raised error stops the whole run.
pub(crate) fn conclude(
    ctx: &TestContext,
    status: &ExecStatus,
    elapsed: Duration,
    limit_exceeded: bool,
    catch_exceptions: bool,
) -> Result<()> {
    if limit_exceeded {
        report_limit_exceeded(ctx);
    }
    match status {
        ExecStatus::Returned | ExecStatus::Aborted => {}
        ExecStatus::Raised {
            message,
            stack_trace,
        } => {
            tracing::debug!(test = ctx.full_name(), %message, "threw an error");
            if !catch_exceptions {
                return Err(Error::runner(format!(
                    "uncaught error in test {}: {message}",
                    ctx.full_name()
                )));
            }
            ctx.report(TestOutcome::exception(
                "An error",
                message,
                stack_trace.as_deref(),
            ));
        }
        ExecStatus::Panicked { message } => {
            tracing::debug!(test = ctx.full_name(), %message, "threw a panic");
            ctx.report(TestOutcome::exception("A panic", message, None));
        }
        ExecStatus::StudentExit { status } => {
            let message = StudentExit { status: *status }.message();
            ctx.report(TestOutcome::new(OutcomeKind::Exception, message, Verdict::Fail));
        }
        ExecStatus::TimedOut => {
            tracing::warn!(
                test = ctx.full_name(),
                "timed out after {} ms",
                elapsed.as_millis()
            );
            ctx.report(TestOutcome::timeout());
        }
        ExecStatus::Crashed { description } => {
            tracing::warn!(test = ctx.full_name(), %description, "test process crashed");
            ctx.report(TestOutcome::new(
                OutcomeKind::Exception,
                format!("test process crashed with {description}"),
                Verdict::Fail,
            ));
        }
    }
    Ok(())
}

pub(crate) fn report_limit_exceeded(ctx: &TestContext) {
    let limit = ctx.capture().output_limit();
    let error = Error::OutputLimitExceeded { limit };
    ctx.report(TestOutcome::exception("An error", &error.to_string(), None));
}
