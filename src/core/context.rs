use crate::capture::{self, Console, OutputCapture};
use crate::config::Config;
use crate::core::error::{Error, Result, TestError};
use crate::outcome::{Applied, OutcomeKind, TestOutcome, ValueType, Verdict};
use crate::reporter::{Reporter, TestInfo};
use crate::results::ResultBoard;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Tolerance used by [`TestContext::assert_equals_double`].
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// State shared by the runner and every test of one grading session.
pub struct RunContext {
    config: Config,
    board: ResultBoard,
    reporter: OnceLock<Arc<dyn Reporter>>,
    current_test: Mutex<Option<String>>,
    generation: AtomicU64,
}

impl RunContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            board: ResultBoard::new(),
            reporter: OnceLock::new(),
            current_test: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn board(&self) -> &ResultBoard {
        &self.board
    }

    /// Attach the results listener. Only the first call has an effect.
    ///
    /// Returns whether this call attached `reporter`.
    pub fn attach(&self, reporter: Arc<dyn Reporter>) -> bool {
        let name = reporter.name().to_string();
        let attached = self.reporter.set(reporter).is_ok();
        if attached {
            tracing::debug!(reporter = %name, "attached reporter");
        }
        attached
    }

    pub fn is_attached(&self) -> bool {
        self.reporter.get().is_some()
    }

    /// The attached reporter.
    pub fn reporter(&self) -> Result<&Arc<dyn Reporter>> {
        self.reporter
            .get()
            .ok_or_else(|| Error::not_initialized("no reporter attached"))
    }

    /// Full name of the test currently being run, if any.
    pub fn current_test(&self) -> Option<String> {
        self.current_test
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_current_test(&self, full_name: Option<String>) {
        *self
            .current_test
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = full_name;
    }

    /// Start a new session: forget every result and stop accepting outcomes
    /// from tests of earlier sessions.
    pub fn begin_run(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.board.clear();
        tracing::trace!(generation, "cleared results");
        generation
    }

    /// Number of the current session.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Record an outcome reported during session `generation` and forward it
    /// to the reporter.
    ///
    /// Outcomes from an earlier session, such as a test thread abandoned after
    /// a timeout finally finishing, are dropped.
    pub fn report(
        &self,
        generation: u64,
        info: &TestInfo,
        outcome: &TestOutcome,
    ) -> Option<Applied> {
        if generation != self.generation() {
            tracing::debug!(
                test = %info.full_name,
                generation,
                "dropped outcome from an earlier run"
            );
            return None;
        }
        let applied = self.board.apply(&info.full_name, outcome);
        tracing::trace!(
            test = %info.full_name,
            kind = ?outcome.kind,
            verdict = %applied.verdict,
            "recorded outcome"
        );
        if let Some(reporter) = self.reporter.get() {
            reporter.on_detail(info, outcome);
        }
        Some(applied)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("attached", &self.is_attached())
            .field("current_test", &self.current_test())
            .finish_non_exhaustive()
    }
}

/// Handle given to a test body: assertions, console access and cancellation.
///
/// Every assertion reports its outcome before returning, so the detail of the
/// last assertion attempted is recorded even if the body never returns.
pub struct TestContext {
    info: TestInfo,
    run: Arc<RunContext>,
    capture: OutputCapture,
    cancelled: AtomicBool,
    generation: u64,
}

impl TestContext {
    pub(crate) fn new(info: TestInfo, run: Arc<RunContext>, capture: OutputCapture) -> Self {
        let generation = run.generation();
        Self {
            info,
            run,
            capture,
            cancelled: AtomicBool::new(false),
            generation,
        }
    }

    pub fn info(&self) -> &TestInfo {
        &self.info
    }

    pub fn full_name(&self) -> &str {
        &self.info.full_name
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn category(&self) -> &str {
        &self.info.category
    }

    pub fn config(&self) -> &Config {
        self.run.config()
    }

    /// Record an outcome for this test. Returns whether it passed.
    pub fn report(&self, outcome: TestOutcome) -> bool {
        let passed = outcome.passed();
        self.run.report(self.generation, &self.info, &outcome);
        passed
    }

    /// Whether the runner gave up on this test.
    ///
    /// Long-running bodies should poll this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the test and close its output so further writes fail.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.capture.close();
    }

    /// The capture collecting this test's output.
    pub fn capture(&self) -> &OutputCapture {
        &self.capture
    }

    /// A console writing into this test's capture.
    pub fn console(&self) -> Console {
        Console::captured(&self.capture)
    }

    /// Run a student entry point with `input` as its stdin and return its output.
    pub fn run_and_capture<F>(&self, main: F, input: &str) -> std::result::Result<String, TestError>
    where
        F: FnOnce(&mut Console) -> i32,
    {
        if self.is_cancelled() {
            return Err(TestError::Aborted);
        }
        let runner = &self.config().runner;
        let (_, output) =
            capture::run_and_capture(main, input, runner.output_limit, runner.capture_stderr)?;
        Ok(output)
    }

    // --- Soft assertions: report and keep going ---

    pub fn assert_equals<T>(&self, message: &str, expected: T, actual: T) -> bool
    where
        T: AssertValue + PartialEq,
    {
        let passed = expected == actual;
        self.report(compared(
            OutcomeKind::AssertEquals,
            message,
            &expected,
            &actual,
            passed,
        ))
    }

    /// Like [`assert_equals`](Self::assert_equals), but only records a failure.
    pub fn assert_equals_quiet<T>(&self, message: &str, expected: T, actual: T) -> bool
    where
        T: AssertValue + PartialEq,
    {
        if expected == actual {
            return true;
        }
        self.report(compared(
            OutcomeKind::AssertEquals,
            message,
            &expected,
            &actual,
            false,
        ))
    }

    pub fn assert_not_equals<T>(&self, message: &str, unexpected: T, actual: T) -> bool
    where
        T: AssertValue + PartialEq,
    {
        let passed = unexpected != actual;
        self.report(compared(
            OutcomeKind::AssertNotEquals,
            message,
            &unexpected,
            &actual,
            passed,
        ))
    }

    /// Compare floating point values within `tolerance`.
    pub fn assert_near(&self, message: &str, expected: f64, actual: f64, tolerance: f64) -> bool {
        let passed = (expected - actual).abs() <= tolerance;
        self.report(compared(
            OutcomeKind::AssertNear,
            message,
            &expected,
            &actual,
            passed,
        ))
    }

    pub fn assert_equals_double(&self, message: &str, expected: f64, actual: f64) -> bool {
        self.assert_near(message, expected, actual, DEFAULT_TOLERANCE)
    }

    /// Compare program output, ignoring `\r\n` versus `\n` line endings.
    pub fn assert_diff(&self, message: &str, expected: &str, actual: &str) -> bool {
        let passed = normalize_newlines(expected) == normalize_newlines(actual);
        self.report(TestOutcome::compared(
            OutcomeKind::AssertDiff,
            message,
            expected,
            actual,
            ValueType::Diff,
            passed,
        ))
    }

    pub fn assert_true(&self, message: &str, value: bool) -> bool {
        self.report(compared(OutcomeKind::AssertTrue, message, &true, &value, value))
    }

    pub fn assert_false(&self, message: &str, value: bool) -> bool {
        self.report(compared(
            OutcomeKind::AssertFalse,
            message,
            &false,
            &value,
            !value,
        ))
    }

    pub fn assert_null<T: AssertValue>(&self, message: &str, value: &Option<T>) -> bool {
        self.report(TestOutcome::compared(
            OutcomeKind::AssertNull,
            message,
            "null",
            render_option(value),
            ValueType::Pointer,
            value.is_none(),
        ))
    }

    pub fn assert_not_null<T: AssertValue>(&self, message: &str, value: &Option<T>) -> bool {
        self.report(TestOutcome::compared(
            OutcomeKind::AssertNotNull,
            message,
            "not null",
            render_option(value),
            ValueType::Pointer,
            value.is_some(),
        ))
    }

    /// Assert that `f` panics.
    pub fn assert_panics<F, R>(&self, message: &str, f: F) -> bool
    where
        F: FnOnce() -> R,
    {
        let panicked = panic::catch_unwind(AssertUnwindSafe(f)).is_err();
        self.report(TestOutcome::compared(
            OutcomeKind::NotException,
            message,
            "throw an exception",
            threw_text(panicked),
            ValueType::String,
            panicked,
        ))
    }

    /// Assert that `f` returns without panicking.
    pub fn assert_not_panics<F, R>(&self, message: &str, f: F) -> bool
    where
        F: FnOnce() -> R,
    {
        let panicked = panic::catch_unwind(AssertUnwindSafe(f)).is_err();
        self.report(TestOutcome::compared(
            OutcomeKind::Exception,
            message,
            "do not throw an exception",
            threw_text(panicked),
            ValueType::String,
            !panicked,
        ))
    }

    /// Record an explicit pass.
    pub fn pass(&self, message: &str) -> bool {
        self.report(TestOutcome::new(OutcomeKind::Pass, message, Verdict::Pass))
    }

    /// Record an explicit failure.
    pub fn fail(&self, message: &str) -> bool {
        self.report(TestOutcome::new(OutcomeKind::Fail, message, Verdict::Fail))
    }

    // --- Hard assertions: report, then stop the body through `?` ---

    pub fn require_equals<T>(
        &self,
        message: &str,
        expected: T,
        actual: T,
    ) -> std::result::Result<(), TestError>
    where
        T: AssertValue + PartialEq,
    {
        abort_unless(self.assert_equals(message, expected, actual))
    }

    pub fn require_true(&self, message: &str, value: bool) -> std::result::Result<(), TestError> {
        abort_unless(self.assert_true(message, value))
    }

    /// Record a failure and stop the body.
    pub fn fail_now(&self, message: &str) -> std::result::Result<(), TestError> {
        self.fail(message);
        Err(TestError::Aborted)
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("test", &self.info.full_name)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn abort_unless(passed: bool) -> std::result::Result<(), TestError> {
    if passed { Ok(()) } else { Err(TestError::Aborted) }
}

fn compared<T: AssertValue + ?Sized>(
    kind: OutcomeKind,
    message: &str,
    expected: &T,
    actual: &T,
    passed: bool,
) -> TestOutcome {
    TestOutcome::compared(
        kind,
        message,
        expected.render(),
        actual.render(),
        expected.value_type(),
        passed,
    )
}

fn render_option<T: AssertValue>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.render(),
        None => "null".to_string(),
    }
}

fn threw_text(panicked: bool) -> &'static str {
    if panicked {
        "threw an exception"
    } else {
        "did not throw an exception"
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// A value that can appear on either side of an assertion.
pub trait AssertValue {
    /// Display tag used to quote the rendered value.
    fn value_type(&self) -> ValueType;

    /// Text shown as the expected or student value.
    fn render(&self) -> String;
}

macro_rules! assert_value_display {
    ($value_type:expr => $($ty:ty),*) => {
        $(
            impl AssertValue for $ty {
                fn value_type(&self) -> ValueType {
                    $value_type
                }

                fn render(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

assert_value_display!(ValueType::Int => i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
assert_value_display!(ValueType::Double => f32, f64);
assert_value_display!(ValueType::Bool => bool);
assert_value_display!(ValueType::Char => char);
assert_value_display!(ValueType::String => str, String);

impl<T: AssertValue + ?Sized> AssertValue for &T {
    fn value_type(&self) -> ValueType {
        (**self).value_type()
    }

    fn render(&self) -> String {
        (**self).render()
    }
}

impl<T: AssertValue> AssertValue for [T] {
    fn value_type(&self) -> ValueType {
        ValueType::Other
    }

    fn render(&self) -> String {
        let items: Vec<String> = self
            .iter()
            .map(|item| item.value_type().quote(&item.render()))
            .collect();
        format!("{{{}}}", items.join(", "))
    }
}

impl<T: AssertValue> AssertValue for Vec<T> {
    fn value_type(&self) -> ValueType {
        ValueType::Other
    }

    fn render(&self) -> String {
        self.as_slice().render()
    }
}

impl<T: AssertValue> AssertValue for Option<T> {
    fn value_type(&self) -> ValueType {
        match self {
            Some(v) => v.value_type(),
            None => ValueType::Pointer,
        }
    }

    fn render(&self) -> String {
        render_option(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::RunAggregate;
    use crate::results::TestRecord;
    use std::io::Write;

    /// Reporter that remembers every detail it receives.
    #[derive(Default)]
    struct Recorder {
        details: Mutex<Vec<TestOutcome>>,
    }

    impl Reporter for Recorder {
        fn on_test_start(&self, _: &TestInfo) {}

        fn on_detail(&self, _: &TestInfo, outcome: &TestOutcome) {
            self.details.lock().unwrap().push(outcome.clone());
        }

        fn on_test_end(&self, _: &TestInfo, _: &TestRecord) {}

        fn on_summary(&self, _: &RunAggregate) {}

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn make_context() -> (TestContext, Arc<RunContext>, Arc<Recorder>) {
        let run = Arc::new(RunContext::new(Config::default()));
        let recorder = Arc::new(Recorder::default());
        run.attach(recorder.clone());
        let info = TestInfo {
            index: 1,
            category: "Basic".to_string(),
            name: "t1".to_string(),
            full_name: "Basic_t1".to_string(),
            timeout_ms: 0,
        };
        let ctx = TestContext::new(info, Arc::clone(&run), OutputCapture::new());
        (ctx, run, recorder)
    }

    #[test]
    fn test_attach_is_idempotent() {
        let run = RunContext::new(Config::default());
        assert!(run.reporter().is_err());
        assert!(run.attach(Arc::new(Recorder::default())));
        assert!(!run.attach(Arc::new(Recorder::default())));
        assert_eq!(run.reporter().unwrap().name(), "recorder");
    }

    #[test]
    fn test_assert_equals_reports_values() {
        let (ctx, run, recorder) = make_context();
        assert!(!ctx.assert_equals("answer", 42, 43));
        let details = recorder.details.lock().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].expected, "42");
        assert_eq!(details[0].actual, "43");
        assert_eq!(details[0].value_type, ValueType::Int);
        assert_eq!(run.board().verdict("Basic_t1"), Verdict::Fail);
    }

    #[test]
    fn test_first_failure_is_sticky() {
        let (ctx, run, _) = make_context();
        ctx.assert_equals("first", "a", "b");
        ctx.assert_equals("second", "c", "c");
        let record = run.board().get("Basic_t1").unwrap();
        assert_eq!(record.verdict, Verdict::Fail);
        assert_eq!(record.detail.unwrap().message, "first");
    }

    #[test]
    fn test_outcomes_from_earlier_run_are_dropped() {
        let (ctx, run, recorder) = make_context();
        assert_eq!(run.generation(), 0);
        assert_eq!(run.begin_run(), 1);

        assert!(!ctx.assert_equals("late", 1, 2));
        assert!(recorder.details.lock().unwrap().is_empty());
        assert!(run.board().get("Basic_t1").is_none());
        assert_eq!(run.board().aggregate().total, 0);
    }

    #[test]
    fn test_quiet_assert_only_reports_failures() {
        let (ctx, _, recorder) = make_context();
        assert!(ctx.assert_equals_quiet("q", 1, 1));
        assert!(recorder.details.lock().unwrap().is_empty());
        assert!(!ctx.assert_equals_quiet("q", 1, 2));
        assert_eq!(recorder.details.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_assert_near_and_double() {
        let (ctx, _, _) = make_context();
        assert!(ctx.assert_near("pi", 3.14159, 3.1416, 0.001));
        assert!(!ctx.assert_near("pi", 3.0, 3.1, 0.01));
        assert!(ctx.assert_equals_double("half", 0.5, 0.5004));
    }

    #[test]
    fn test_assert_diff_ignores_crlf() {
        let (ctx, _, recorder) = make_context();
        assert!(ctx.assert_diff("output", "a\nb\n", "a\r\nb\r\n"));
        assert_eq!(recorder.details.lock().unwrap()[0].value_type, ValueType::Diff);
    }

    #[test]
    fn test_assert_null_over_option() {
        let (ctx, _, recorder) = make_context();
        assert!(ctx.assert_null::<i32>("empty", &None));
        assert!(!ctx.assert_not_null::<i32>("empty", &None));
        assert!(ctx.assert_not_null("found", &Some(3)));
        let details = recorder.details.lock().unwrap();
        assert_eq!(details[1].actual, "null");
        assert_eq!(details[2].actual, "3");
    }

    #[test]
    fn test_assert_panics() {
        let (ctx, _, recorder) = make_context();
        assert!(ctx.assert_panics("index", || {
            let v: Vec<i32> = Vec::new();
            v[1]
        }));
        assert!(ctx.assert_not_panics("ok", || 1 + 1));
        let details = recorder.details.lock().unwrap();
        assert_eq!(details[0].kind, OutcomeKind::NotException);
        assert_eq!(details[0].actual, "threw an exception");
        assert_eq!(details[1].kind, OutcomeKind::Exception);
        assert_eq!(details[1].expected, "do not throw an exception");
    }

    #[test]
    fn test_require_stops_body() {
        let (ctx, _, _) = make_context();
        let body = |ctx: &TestContext| -> std::result::Result<(), TestError> {
            ctx.require_true("must hold", false)?;
            ctx.pass("unreachable");
            Ok(())
        };
        assert!(matches!(body(&ctx), Err(TestError::Aborted)));
        assert!(matches!(ctx.fail_now("stop"), Err(TestError::Aborted)));
    }

    #[test]
    fn test_render_collections() {
        assert_eq!(vec![1, 2, 3].render(), "{1, 2, 3}");
        assert_eq!(vec!["a", "b"].render(), "{\"a\", \"b\"}");
        assert_eq!(Some('x').render(), "x");
        assert_eq!(None::<i32>.render(), "null");
        assert_eq!("hi".value_type(), ValueType::String);
    }

    #[test]
    fn test_cancel_closes_output() {
        let (ctx, _, _) = make_context();
        ctx.capture().begin(false);
        ctx.cancel();
        assert!(ctx.is_cancelled());
        let mut console = ctx.console();
        assert!(console.write_all(b"late").is_err());
        assert!(matches!(
            ctx.run_and_capture(|_| 0, ""),
            Err(TestError::Aborted)
        ));
    }

    #[test]
    fn test_run_and_capture_on_context() {
        let _guard = crate::exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let (ctx, _, _) = make_context();
        let output = ctx
            .run_and_capture(
                |console| {
                    let line = console.read_line().ok().flatten().unwrap_or_default();
                    let n: i32 = line.parse().unwrap_or(0);
                    let _ = writeln!(console, "{}", n * 2);
                    0
                },
                "21\n",
            )
            .unwrap();
        assert_eq!(output, "42\n");
    }

    #[test]
    fn test_current_test_tracking() {
        let run = RunContext::new(Config::default());
        assert_eq!(run.current_test(), None);
        run.set_current_test(Some("Basic_t1".to_string()));
        assert_eq!(run.current_test().as_deref(), Some("Basic_t1"));
    }
}
