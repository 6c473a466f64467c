//! Terminal output for grading results.

use super::{Reporter, TestInfo};
use crate::config::ReportConfig;
use crate::outcome::{OutcomeKind, RunAggregate, TestOutcome, Verdict};
use crate::results::TestRecord;
use crate::style::StyleReport;
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Line printed between sections of the transcript.
pub const SEPARATOR: &str =
    "====================================================================";

const INDENT: &str = "        ";
const STYLE_INDENT: &str = "         ";

#[derive(Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    warn: Style,
    summary: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.warn = Style::new().yellow().bold();
        self.summary = Style::new().bold();
    }
}

struct ConsoleState {
    writer: Box<dyn Write + Send>,
    current: Option<String>,
    failures: usize,
}

/// Prints one line per test, the first failures of each test, and a summary.
pub struct ConsoleReporter {
    state: Mutex<ConsoleState>,
    fails_to_print: usize,
    name_width: usize,
    styles: Styles,
}

impl ConsoleReporter {
    /// Create a reporter printing to stdout.
    pub fn new(report: &ReportConfig) -> Self {
        let mut reporter = Self::with_writer(report, io::stdout());
        if report.color.should_colorize() {
            reporter.styles.colorize();
        }
        reporter
    }

    /// Create an uncolored reporter printing to `writer`.
    pub fn with_writer(report: &ReportConfig, writer: impl Write + Send + 'static) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                writer: Box::new(writer),
                current: None,
                failures: 0,
            }),
            fails_to_print: report.fails_to_print_per_test,
            name_width: report.test_name_width,
            styles: Styles::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a write against the output, logging instead of failing on I/O errors.
    fn emit(&self, f: impl FnOnce(&mut ConsoleState) -> io::Result<()>) {
        let mut state = self.lock();
        if let Err(e) = f(&mut state).and_then(|()| state.writer.flush()) {
            tracing::warn!(error = %e, "failed to write console report");
        }
    }

    fn should_print(&self, failures: usize) -> bool {
        self.fails_to_print == 0 || failures <= self.fails_to_print
    }

    fn headline(&self, outcome: &TestOutcome) -> String {
        if outcome.verdict == Verdict::Warn {
            "WARNING!".style(self.styles.warn).to_string()
        } else if outcome.kind == OutcomeKind::Exception && outcome.expected.is_empty() {
            "EXCEPTION!".style(self.styles.fail).to_string()
        } else {
            "FAIL!".style(self.styles.fail).to_string()
        }
    }
}

impl Reporter for ConsoleReporter {
    fn on_test_start(&self, info: &TestInfo) {
        let width = self.name_width;
        self.emit(|state| {
            state.current = Some(info.full_name.clone());
            state.failures = 0;
            write!(
                state.writer,
                "{:>4}) {:<width$} ... ",
                info.index, info.name
            )
        });
    }

    fn on_detail(&self, info: &TestInfo, outcome: &TestOutcome) {
        if outcome.passed() {
            return;
        }
        self.emit(|state| {
            if state.current.as_deref() != Some(info.full_name.as_str()) {
                tracing::debug!(test = %info.full_name, "dropping detail for a finished test");
                return Ok(());
            }
            state.failures += 1;
            if state.failures == 1 {
                writeln!(state.writer, "{}", self.headline(outcome))?;
            }
            if !self.should_print(state.failures) {
                return Ok(());
            }
            for line in outcome.fail_message().lines() {
                writeln!(state.writer, "{INDENT}{line}")?;
            }
            if !outcome.expected.is_empty() || !outcome.actual.is_empty() {
                let quote = |value: &str| outcome.value_type.quote(value);
                writeln!(state.writer, "{INDENT}Student : {}", quote(&outcome.actual))?;
                writeln!(state.writer, "{INDENT}Expected: {}", quote(&outcome.expected))?;
            }
            Ok(())
        });
    }

    fn on_test_end(&self, info: &TestInfo, record: &TestRecord) {
        self.emit(|state| {
            if state.current.as_deref() != Some(info.full_name.as_str()) {
                return Ok(());
            }
            state.current = None;
            if record.verdict == Verdict::Pass {
                let pass = "pass".style(self.styles.pass);
                return writeln!(state.writer, "{pass}, {:>5}ms", record.elapsed_ms());
            }
            if state.failures == 0 {
                writeln!(state.writer, "{}", "FAIL!".style(self.styles.fail))?;
            }
            if self.fails_to_print > 0 && state.failures > self.fails_to_print {
                let extra = state.failures - self.fails_to_print;
                writeln!(
                    state.writer,
                    "{INDENT}({extra} additional assertion failure(s) not printed)"
                )?;
            }
            Ok(())
        });
    }

    fn on_summary(&self, aggregate: &RunAggregate) {
        self.emit(|state| {
            writeln!(state.writer, "{SEPARATOR}")?;
            write!(
                state.writer,
                "Total tests: {}, passed: {}, failed: {}",
                aggregate.total, aggregate.passed, aggregate.failed
            )?;
            if aggregate.warned > 0 {
                write!(state.writer, ", warned: {}", aggregate.warned)?;
            }
            writeln!(state.writer)?;
            let sentence = if aggregate.all_passed() {
                "The student passed all functionality tests. Hooray!".to_string()
            } else {
                format!(
                    "The student failed {} functionality tests. Please investigate.",
                    aggregate.not_passed()
                )
            };
            writeln!(state.writer, "{}", sentence.style(self.styles.summary))
        });
    }

    fn on_style_check(&self, report: &StyleReport, _merged: bool) {
        self.emit(|state| {
            let out = &mut state.writer;
            writeln!(out, "{}", report.header())?;
            writeln!(out, "  (Note: These are just heuristics and suggestions, not hard rules.")?;
            writeln!(out, "         The style checker isn't able to check everything.")?;
            writeln!(out, "         Please look at the student's code and don't penalize them")?;
            writeln!(out, "         unless you actually see a problem with their coding style.)")?;
            writeln!(out)?;
            if let Some(error) = &report.error {
                return writeln!(out, "*** ERROR: {error}");
            }
            if report.omit_on_pass {
                writeln!(
                    out,
                    "(Note: Showing only the output of style checks that fail. Passing checks are omitted.)"
                )?;
                writeln!(out)?;
            }
            for result in report.visible() {
                let label = match result.verdict() {
                    Verdict::Pass => "PASSED : ".style(self.styles.pass).to_string(),
                    Verdict::Fail => "FAILED : ".style(self.styles.fail).to_string(),
                    _ => "WARNING: ".style(self.styles.warn).to_string(),
                };
                writeln!(out, "    STYLE CHECK {label}{}", result.description)?;
                if result.show_counts {
                    writeln!(out, "{STYLE_INDENT}{}", result.range_text())?;
                    writeln!(out, "{STYLE_INDENT}{}", result.student_text())?;
                }
            }
            writeln!(
                out,
                "    STYLE CHECK: passed {} of {} checks.",
                report.passed_count(),
                report.total()
            )
        });
    }

    fn name(&self) -> &str {
        "console"
    }
}
