//! Test outcomes, verdicts, and the sticky-failure transition rule.
//!
//! Every assertion produces a [`TestOutcome`]. Outcomes for the same test are
//! folded together with [`apply_outcome`], which is the only place the
//! "a failure is not silently replaced by a later pass" rule lives. Both the
//! result board and the graphical panel model go through it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix used when printing a failed assertion on the console.
pub const FAIL_PREFIX: &str = "Assertion failed: ";

/// Fixed message recorded for a test that exceeded its timeout.
pub const TIMEOUT_MESSAGE: &str = "test timed out! possible infinite loop";

/// The kind of check that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    AssertEquals,
    AssertNotEquals,
    AssertNear,
    AssertDiff,
    AssertTrue,
    AssertFalse,
    AssertNull,
    AssertNotNull,
    /// An exception escaped the test body, or was expected not to be thrown.
    Exception,
    /// An exception was expected to be thrown.
    NotException,
    Pass,
    Fail,
    StyleCheck,
}

impl OutcomeKind {
    /// Suffix appended to the message when a failure is printed on the console.
    pub fn console_suffix(self) -> Option<&'static str> {
        match self {
            OutcomeKind::AssertEquals => Some("(must be equal)"),
            OutcomeKind::AssertNotEquals => Some("(must be non-equal)"),
            OutcomeKind::AssertNear => Some("(must be nearly equal)"),
            OutcomeKind::AssertTrue => Some("(must be true)"),
            OutcomeKind::AssertFalse => Some("(must be false)"),
            _ => None,
        }
    }

    /// Suffix appended to the message in the graphical detail view.
    pub fn detail_suffix(self) -> Option<&'static str> {
        match self {
            OutcomeKind::AssertEquals => Some("(must be equal)"),
            OutcomeKind::AssertNotEquals => Some("(must be non-equal)"),
            OutcomeKind::AssertNear => Some("(must be nearly equal)"),
            OutcomeKind::AssertDiff => Some("(program output must match)"),
            OutcomeKind::NotException => Some("(didn't throw expected exception)"),
            OutcomeKind::Pass => Some("(passed)"),
            OutcomeKind::Fail => Some("(failed)"),
            _ => None,
        }
    }
}

/// Display tag for the values carried by an outcome.
///
/// Only used for presentation, e.g. strings are quoted with `"` and chars with `'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    String,
    Char,
    Bool,
    Int,
    Double,
    Pointer,
    Diff,
    /// Any other displayable type.
    Other,
}

impl ValueType {
    /// Wrap a rendered value in the quoting used for this type.
    pub fn quote(self, value: &str) -> String {
        match self {
            ValueType::String => format!("\"{value}\""),
            ValueType::Char => format!("'{value}'"),
            _ => value.to_string(),
        }
    }
}

/// Per-test verdict, also used as the display state of a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Unknown,
    Running,
    Pass,
    Fail,
    Warn,
}

impl Verdict {
    /// Whether this verdict can only be replaced by a stronger one or an overwrite.
    pub fn is_sticky(self) -> bool {
        matches!(self, Verdict::Fail | Verdict::Warn)
    }

    /// Whether the test has finished with a final verdict.
    pub fn is_terminal(self) -> bool {
        matches!(self, Verdict::Pass | Verdict::Fail | Verdict::Warn)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Unknown => "unknown",
            Verdict::Running => "running",
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Warn => "warn",
        };
        f.write_str(s)
    }
}

/// The recorded result of one assertion or synthesized event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub kind: OutcomeKind,
    pub message: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub actual: String,
    #[serde(default)]
    pub value_type: ValueType,
    pub verdict: Verdict,
    /// Allow this outcome to replace an earlier failure or warning.
    #[serde(default)]
    pub overwrite: bool,
}

impl TestOutcome {
    /// Create an outcome with no expected/actual values.
    pub fn new(kind: OutcomeKind, message: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            kind,
            message: message.into(),
            expected: String::new(),
            actual: String::new(),
            value_type: ValueType::default(),
            verdict,
            overwrite: false,
        }
    }

    /// Create a comparison outcome.
    pub fn compared(
        kind: OutcomeKind,
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
        value_type: ValueType,
        passed: bool,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            expected: expected.into(),
            actual: actual.into(),
            value_type,
            verdict: if passed { Verdict::Pass } else { Verdict::Fail },
            overwrite: false,
        }
    }

    /// The outcome synthesized when a test exceeds its timeout.
    pub fn timeout() -> Self {
        Self::new(OutcomeKind::Fail, TIMEOUT_MESSAGE, Verdict::Fail)
    }

    /// The outcome synthesized when an error escapes the test body.
    pub fn exception(kind: &str, description: &str, stack_trace: Option<&str>) -> Self {
        let mut message = format!("{kind} was thrown during test execution:\n{description}\n\n");
        match stack_trace {
            Some(trace) if !trace.is_empty() => {
                message.push_str("Stack trace:\n");
                message.push_str(trace);
            }
            _ => {
                message.push_str(
                    "(Sorry; stack trace cannot be shown in this view.\n \
                     To see a stack trace, run again\n \
                     with 'Catch exceptions' turned off.)",
                );
            }
        }
        Self::new(OutcomeKind::Exception, message, Verdict::Fail)
    }

    /// Mark this outcome as allowed to replace an earlier failure.
    pub fn with_overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }

    /// Downgrade a failing outcome to a warning.
    pub fn as_warning(mut self) -> Self {
        if self.verdict == Verdict::Fail {
            self.verdict = Verdict::Warn;
        }
        self
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// The one-line failure message printed on the console.
    pub fn fail_message(&self) -> String {
        match self.kind.console_suffix() {
            Some(suffix) => format!("{FAIL_PREFIX}{}  {suffix}", self.message),
            None => format!("{FAIL_PREFIX}{}", self.message),
        }
    }
}

/// Result of folding an incoming outcome into the existing state of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// The verdict after the transition.
    pub verdict: Verdict,
    /// Whether the incoming outcome replaces the stored detail.
    pub replace_detail: bool,
}

/// Compute the verdict after `incoming` arrives on a test currently in `current`.
///
/// `Unknown`, `Running` and `Pass` accept anything. `Fail` only accepts an
/// overwrite. `Warn` accepts an escalation to `Fail` or an overwrite.
pub fn next_verdict(current: Verdict, incoming: Verdict, overwrite: bool) -> Verdict {
    if overwrite {
        return incoming;
    }
    match (current, incoming) {
        (Verdict::Fail, _) => Verdict::Fail,
        (Verdict::Warn, Verdict::Fail) => Verdict::Fail,
        (Verdict::Warn, _) => Verdict::Warn,
        (_, incoming) => incoming,
    }
}

/// Fold an incoming outcome into a test whose current verdict is `current`.
pub fn apply_outcome(current: Verdict, incoming: &TestOutcome) -> Applied {
    let verdict = next_verdict(current, incoming.verdict, incoming.overwrite);
    let replace_detail = incoming.overwrite || !current.is_sticky();
    Applied {
        verdict,
        replace_detail,
    }
}

/// Running pass/total counters for a grading session.
///
/// Warnings count toward the total but never toward `passed`; they are
/// tallied separately so reporters can list them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAggregate {
    pub passed: usize,
    pub failed: usize,
    pub warned: usize,
    pub total: usize,
}

impl RunAggregate {
    /// Count one finished test.
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Fail => self.failed += 1,
            Verdict::Warn => self.warned += 1,
            Verdict::Unknown | Verdict::Running => return,
        }
        self.total += 1;
    }

    /// Tests that did not pass, warnings included.
    pub fn not_passed(&self) -> usize {
        self.total - self.passed
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}
