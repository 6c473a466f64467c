//! Child-process isolation.
//!
//! The parent re-invokes a grader executable with [`CHILD_TEST_ENV`] naming the
//! test to run and [`CHILD_REPORT_ENV`] naming a report file. The child runs
//! that single test inline and appends one JSON [`ChildEvent`] per line to the
//! report as outcomes happen, so everything reported before a crash survives
//! it. The parent polls the child, kills it on timeout, then replays the
//! events into its own context.

use super::{ExecStatus, Executor, InlineExecutor, report_limit_exceeded};
use crate::capture::OutputCapture;
use crate::config::Config;
use crate::core::context::{RunContext, TestContext};
use crate::core::error::{Error, Result};
use crate::exit::Lockdown;
use crate::outcome::{RunAggregate, TestOutcome};
use crate::registry::{TestDescriptor, TestRegistry};
use crate::reporter::{Reporter, TestInfo};
use crate::results::TestRecord;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Full name of the test a child process should run.
pub const CHILD_TEST_ENV: &str = "AUTOGRADER_CHILD_TEST";

/// Path of the file a child process streams its events to.
pub const CHILD_REPORT_ENV: &str = "AUTOGRADER_CHILD_REPORT";

static REPORT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// One line of a child's report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ChildEvent {
    Outcome { outcome: TestOutcome },
    Output { text: String },
    Finished { status: ExecStatus },
}

/// Program and arguments used to start a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ChildCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-invoke the running executable with no arguments.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| Error::runner(format!("cannot locate current executable: {e}")))?;
        Ok(Self::new(program, Vec::new()))
    }
}

/// Runs each body in a child process that is killed on timeout.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: ChildCommand,
    poll_interval: Duration,
    report_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(command: ChildCommand, poll_interval: Duration) -> Self {
        Self {
            command,
            poll_interval,
            report_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the per-test report files.
    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    fn report_path(&self) -> PathBuf {
        let n = REPORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        self.report_dir
            .join(format!("autograder-{}-{n}.jsonl", std::process::id()))
    }

    fn spawn(&self, test: &TestDescriptor, report: &Path) -> Result<Child> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env(CHILD_TEST_ENV, test.full_name())
            .env(CHILD_REPORT_ENV, report)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        tracing::debug!(test = test.full_name(), command = ?cmd, "spawning test process");
        cmd.spawn().map_err(|e| {
            Error::runner(format!(
                "failed to execute {}: {e}",
                self.command.program.display()
            ))
        })
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, test: &TestDescriptor, ctx: &Arc<TestContext>) -> Result<ExecStatus> {
        let report = self.report_path();
        let mut child = self.spawn(test, &report)?;

        let timeout = Duration::from_millis(test.timeout_ms());
        let deadline = Instant::now() + timeout;
        let exit = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    abandon(&mut child, &report);
                    return Err(Error::runner(format!(
                        "failed to poll test process for {}: {e}",
                        test.full_name()
                    )));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                kill(&mut child);
                let _ = child.wait();
                ctx.cancel();
                break None;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        };

        let events = read_events(&report);
        remove_report(&report);

        let mut finished = None;
        for event in events {
            match event {
                ChildEvent::Outcome { outcome } => {
                    ctx.report(outcome);
                }
                ChildEvent::Output { text } => {
                    let _ = ctx.capture().stdout().write_all(text.as_bytes());
                }
                ChildEvent::Finished { status } => finished = Some(status),
            }
        }

        match exit {
            None => Ok(ExecStatus::TimedOut),
            Some(status) => {
                tracing::debug!(test = test.full_name(), %status, "test process exited");
                Ok(finished.unwrap_or_else(|| ExecStatus::Crashed {
                    description: describe_exit(status),
                }))
            }
        }
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Kill and reap a child we can no longer track, and drop its report file.
fn abandon(child: &mut Child, report: &Path) {
    kill(child);
    let _ = child.wait();
    remove_report(report);
}

fn remove_report(report: &Path) {
    if let Err(e) = std::fs::remove_file(report) {
        tracing::debug!(path = %report.display(), error = %e, "no report file to remove");
    }
}

#[cfg(unix)]
fn kill(child: &mut Child) {
    // SAFETY: the pid belongs to a child we spawned and have not yet reaped.
    unsafe {
        libc::kill(child.id() as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill(child: &mut Child) {
    let _ = child.kill();
}

fn read_events(path: &Path) -> Vec<ChildEvent> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable event from test process");
                None
            }
        })
        .collect()
}

/// Describe how a child ended, e.g. `signal 11 (SIGSEGV)` or `exit code 3`.
pub fn describe_exit(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return match signal_name(signal) {
                Some(name) => format!("signal {signal} ({name})"),
                None => format!("signal {signal}"),
            };
        }
    }
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "unknown status".to_string(),
    }
}

#[cfg(unix)]
fn signal_name(signal: i32) -> Option<&'static str> {
    let name = match signal {
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGABRT => "SIGABRT",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGBUS => "SIGBUS",
        libc::SIGKILL => "SIGKILL",
        libc::SIGTERM => "SIGTERM",
        _ => return None,
    };
    Some(name)
}

/// A request to run one test, read from the environment of a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRequest {
    pub test: String,
    pub report: PathBuf,
}

impl ChildRequest {
    /// The request this process was started with, if it is a test child.
    pub fn from_env() -> Option<Self> {
        let test = std::env::var(CHILD_TEST_ENV).ok()?;
        let report = std::env::var_os(CHILD_REPORT_ENV)?;
        Some(Self {
            test,
            report: PathBuf::from(report),
        })
    }
}

/// Reporter used inside a child: streams every outcome to the report file.
struct EventWriter {
    file: Mutex<File>,
}

impl EventWriter {
    fn send(&self, event: &ChildEvent) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let written = serde_json::to_string(event)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
                file.flush()
            });
        if let Err(e) = written {
            tracing::warn!(error = %e, "failed to write test event");
        }
    }
}

impl Reporter for EventWriter {
    fn on_test_start(&self, _info: &TestInfo) {}

    fn on_detail(&self, _info: &TestInfo, outcome: &TestOutcome) {
        self.send(&ChildEvent::Outcome {
            outcome: outcome.clone(),
        });
    }

    fn on_test_end(&self, _info: &TestInfo, _record: &TestRecord) {}

    fn on_summary(&self, _aggregate: &RunAggregate) {}

    fn name(&self) -> &str {
        "child-events"
    }
}

/// Run the requested test in this process and stream its events.
///
/// The body always runs with exiting disabled and panics caught, so the
/// parent learns how it ended unless the process itself dies.
pub fn run_child(request: &ChildRequest, registry: &TestRegistry, config: Config) -> Result<()> {
    let test = registry
        .find(&request.test)
        .ok_or_else(|| Error::registry(format!("no test named {}", request.test)))?;
    let writer = Arc::new(EventWriter {
        file: Mutex::new(File::create(&request.report)?),
    });
    tracing::debug!(test = %request.test, "running test in child process");

    let runner_config = config.runner.clone();
    let run = Arc::new(RunContext::new(config));
    run.attach(writer.clone());
    run.set_current_test(Some(test.full_name().to_string()));

    let capture = OutputCapture::with_limit(runner_config.output_limit);
    capture.begin(runner_config.capture_stderr);
    let ctx = Arc::new(TestContext::new(
        TestInfo::from_descriptor(1, test),
        run,
        capture.clone(),
    ));

    let status = {
        let _lockdown = Lockdown::engage();
        InlineExecutor::new(true).execute(test, &ctx)?
    };
    let text = capture.end();
    if capture.limit_exceeded() {
        report_limit_exceeded(&ctx);
    }
    writer.send(&ChildEvent::Output { text });
    writer.send(&ChildEvent::Finished { status });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{OutcomeKind, ValueType};

    #[test]
    fn test_child_event_lines() {
        let event = ChildEvent::Outcome {
            outcome: TestOutcome::compared(
                OutcomeKind::AssertEquals,
                "sum",
                "3",
                "4",
                ValueType::Int,
                false,
            ),
        };
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.starts_with(r#"{"event":"outcome""#));
        assert_eq!(serde_json::from_str::<ChildEvent>(&line).unwrap(), event);
    }

    #[test]
    fn test_read_events_skips_truncated_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.jsonl");
        let finished = serde_json::to_string(&ChildEvent::Finished {
            status: ExecStatus::Returned,
        })
        .unwrap();
        std::fs::write(&path, format!("{finished}\n{{\"event\":\"outc")).unwrap();
        let events = read_events(&path);
        assert_eq!(
            events,
            vec![ChildEvent::Finished {
                status: ExecStatus::Returned
            }]
        );
        assert!(read_events(&dir.path().join("missing.jsonl")).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_abandon_reaps_child_and_removes_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("child.jsonl");
        std::fs::write(&report, "").unwrap();
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        abandon(&mut child, &report);
        assert!(child.try_wait().unwrap().is_some());
        assert!(!report.exists());
    }

    #[test]
    fn test_run_child_streams_events() {
        let _guard = crate::exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("child.jsonl");
        let mut registry = TestRegistry::new();
        registry.add(
            "Basic",
            "t2",
            |ctx| {
                ctx.console().write_all(b"hello")?;
                ctx.assert_equals("answer", 42, 43);
                Ok(())
            },
            500,
        );
        let request = ChildRequest {
            test: "Basic_t2".to_string(),
            report: report.clone(),
        };
        run_child(&request, &registry, Config::default()).unwrap();

        let events = read_events(&report);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ChildEvent::Outcome { outcome } if outcome.actual == "43"));
        assert_eq!(
            events[1],
            ChildEvent::Output {
                text: "hello".to_string()
            }
        );
        assert_eq!(
            events[2],
            ChildEvent::Finished {
                status: ExecStatus::Returned
            }
        );
    }

    #[test]
    fn test_run_child_unknown_test() {
        let dir = tempfile::tempdir().unwrap();
        let request = ChildRequest {
            test: "Nope_x".to_string(),
            report: dir.path().join("r.jsonl"),
        };
        let err = run_child(&request, &TestRegistry::new(), Config::default()).unwrap_err();
        assert!(err.to_string().contains("no test named Nope_x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_describe_exit() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(describe_exit(ExitStatus::from_raw(3 << 8)), "exit code 3");
        assert_eq!(
            describe_exit(ExitStatus::from_raw(libc::SIGSEGV)),
            "signal 11 (SIGSEGV)"
        );
    }
}
