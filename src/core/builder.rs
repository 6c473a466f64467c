use crate::capture::{self, Console};
use crate::config::{Config, ConfigLoader, StyleCheckEntry};
use crate::core::context::{RunContext, TestContext};
use crate::core::error::{Error, Result, TestError};
use crate::core::flags::{AutograderFlags, CallbackButton, OUTPUT_SEPARATOR};
use crate::core::prompt::{LinePrompter, Prompter};
use crate::exit::{ExitGuard, Lockdown, StudentExit};
use crate::late_days::LateDays;
use crate::outcome::RunAggregate;
use crate::registry::{TestDescriptor, TestRegistry};
use crate::reporter::graphical::start_message_html;
use crate::reporter::{ConsoleReporter, GraphicalReporter, NullSink, Reporter, UiSink};
use crate::runner::process::{self, ChildRequest};
use crate::runner::{ChildCommand, Executor, TestRunner, create_executor_from_config};
use crate::style::{RegexStyleChecker, StyleChecker, StyleReport, default_rules_file};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

/// The student program's entry point.
pub type StudentMain = Arc<dyn Fn(&mut Console) -> i32 + Send + Sync>;

/// Builder for creating an [`Autograder`].
pub struct AutograderBuilder {
    config: Option<Config>,
    registry: TestRegistry,
    default_timeout_tests: Vec<Arc<TestDescriptor>>,
    callback_buttons: Vec<CallbackButton>,
    on_start: Option<crate::core::flags::StartHook>,
    on_end: Option<crate::core::flags::EndHook>,
    student_main: Option<StudentMain>,
    reporter: Option<Arc<dyn Reporter>>,
    ui_sink: Option<Arc<dyn UiSink>>,
    executor: Option<Box<dyn Executor>>,
    child_command: Option<ChildCommand>,
    style_checker: Option<Box<dyn StyleChecker>>,
    prompter: Option<Box<dyn Prompter>>,
}

impl AutograderBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: None,
            registry: TestRegistry::new(),
            default_timeout_tests: Vec::new(),
            callback_buttons: Vec::new(),
            on_start: None,
            on_end: None,
            student_main: None,
            reporter: None,
            ui_sink: None,
            executor: None,
            child_command: None,
            style_checker: None,
            prompter: None,
        }
    }

    /// Set the configuration directly.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from `autograder.toml` (if present) and the environment.
    pub fn load_config(mut self) -> Result<Self> {
        self.config = Some(ConfigLoader::new().load()?);
        Ok(self)
    }

    /// Load configuration from a standalone TOML file and the environment.
    pub fn from_config_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.config = Some(ConfigLoader::new().config_file(path).load()?);
        Ok(self)
    }

    /// Use an already populated registry.
    pub fn registry(mut self, registry: TestRegistry) -> Self {
        self.registry = registry;
        self
    }

    // --- Tests ---

    /// Register a test. A timeout of 0 runs it without isolation.
    pub fn test<F>(mut self, category: &str, name: &str, timeout_ms: u64, body: F) -> Self
    where
        F: Fn(&TestContext) -> std::result::Result<(), TestError> + Send + Sync + 'static,
    {
        self.registry.add(category, name, body, timeout_ms);
        self
    }

    /// Register a test that uses the configured `runner.default-timeout-ms`.
    ///
    /// The timeout is resolved by [`build`](Self::build), so it follows the
    /// configuration and environment overrides in effect at that point.
    pub fn test_default<F>(mut self, category: &str, name: &str, body: F) -> Self
    where
        F: Fn(&TestContext) -> std::result::Result<(), TestError> + Send + Sync + 'static,
    {
        let test = self.registry.add(category, name, body, 0);
        self.default_timeout_tests.push(test);
        self
    }

    /// Set the description shown for a category.
    pub fn describe_category(mut self, category: &str, description: impl Into<String>) -> Self {
        self.registry.describe_category(category, description);
        self
    }

    /// Mutable access to the registry, for registering tests in a loop.
    pub fn registry_mut(&mut self) -> &mut TestRegistry {
        &mut self.registry
    }

    // --- Student program and hooks ---

    /// Set the student program's entry point.
    pub fn student_main<F>(mut self, main: F) -> Self
    where
        F: Fn(&mut Console) -> i32 + Send + Sync + 'static,
    {
        self.student_main = Some(Arc::new(main));
        self
    }

    /// Offer an extra action after the automated tests.
    pub fn callback_button<F>(mut self, text: impl Into<String>, func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callback_buttons.push(CallbackButton::new(text, func));
        self
    }

    /// Run `hook` before every automated run.
    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Run `hook` with the totals after every automated run.
    pub fn on_end<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RunAggregate) + Send + Sync + 'static,
    {
        self.on_end = Some(Arc::new(hook));
        self
    }

    // --- Reporting ---

    /// Set a custom reporter implementation.
    pub fn reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Use the graphical reporter, forwarding window updates to `sink`.
    pub fn graphical<S: UiSink + 'static>(mut self, sink: S) -> Self {
        self.ui_sink = Some(Arc::new(sink));
        self
    }

    /// Set the prompter used by the text-mode flow.
    pub fn prompter<P: Prompter + 'static>(mut self, prompter: P) -> Self {
        self.prompter = Some(Box::new(prompter));
        self
    }

    // --- Execution ---

    /// Set a custom executor for isolated tests.
    pub fn executor<E: Executor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Box::new(executor));
        self
    }

    /// Command used to start test processes under process isolation.
    pub fn child_command(mut self, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.child_command = Some(ChildCommand::new(program, args));
        self
    }

    /// Set a custom style checker implementation.
    pub fn style_checker<C: StyleChecker + 'static>(mut self, checker: C) -> Self {
        self.style_checker = Some(Box::new(checker));
        self
    }

    // --- Build ---

    /// Build the autograder.
    pub fn build(self) -> Result<Autograder> {
        let config = self
            .config
            .ok_or_else(|| Error::config("no configuration provided"))?;

        let mut flags = AutograderFlags::from_config(&config.grader);
        flags.callback_buttons = self.callback_buttons;
        flags.on_start = self.on_start;
        flags.on_end = self.on_end;
        if self.ui_sink.is_some() {
            flags.graphical = true;
        }

        for test in &self.default_timeout_tests {
            test.set_timeout_ms(config.runner.default_timeout_ms);
            test.set_run_in_own_thread(true);
        }
        let registry = Arc::new(self.registry);
        let run = Arc::new(RunContext::new(config.clone()));

        let mut graphical = None;
        let reporter: Arc<dyn Reporter> = match self.reporter {
            Some(reporter) => reporter,
            None if flags.graphical => {
                let sink = self.ui_sink.unwrap_or_else(|| Arc::new(NullSink));
                let panel = Arc::new(GraphicalReporter::with_registry(
                    &config.report,
                    Arc::clone(&registry),
                    sink,
                ));
                graphical = Some(Arc::clone(&panel));
                panel
            }
            None => Arc::new(ConsoleReporter::new(&config.report)),
        };
        run.attach(Arc::clone(&reporter));

        // Create executor from config if not explicitly set
        let executor = match self.executor {
            Some(executor) => executor,
            None => create_executor_from_config(&config.runner, self.child_command)?,
        };
        let runner = TestRunner::with_executor(run, executor);

        let style_checker = self
            .style_checker
            .unwrap_or_else(|| Box::new(RegexStyleChecker::new()));
        let prompter = self
            .prompter
            .unwrap_or_else(|| Box::new(LinePrompter::stdio()));

        tracing::debug!(
            assignment = %flags.assignment_name,
            tests = registry.len(),
            reporter = reporter.name(),
            "built autograder"
        );

        Ok(Autograder {
            config,
            flags,
            registry,
            runner,
            reporter,
            graphical,
            student_main: self.student_main,
            style_checker,
            prompter: Mutex::new(prompter),
            running: AtomicBool::new(false),
        })
    }
}

impl Default for AutograderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Grading session: runs the tests, the style checker and the student program.
pub struct Autograder {
    config: Config,
    flags: AutograderFlags,
    registry: Arc<TestRegistry>,
    runner: TestRunner,
    reporter: Arc<dyn Reporter>,
    graphical: Option<Arc<GraphicalReporter>>,
    student_main: Option<StudentMain>,
    style_checker: Box<dyn StyleChecker>,
    prompter: Mutex<Box<dyn Prompter>>,
    running: AtomicBool,
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Autograder {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn flags(&self) -> &AutograderFlags {
        &self.flags
    }

    pub fn registry(&self) -> &Arc<TestRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<RunContext> {
        self.runner.context()
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    /// The graphical reporter, when grading graphically.
    pub fn graphical(&self) -> Option<&Arc<GraphicalReporter>> {
        self.graphical.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn lock_prompter(&self) -> MutexGuard<'_, Box<dyn Prompter>> {
        self.prompter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entry point: run the graphical or text flow.
    ///
    /// In a test child process this runs the requested test and returns 0.
    pub fn main_func(&self) -> Result<i32> {
        if ChildRequest::from_env().is_some() {
            self.run_automated_tests()?;
            return Ok(0);
        }
        if self.flags.graphical {
            self.graphical_main()
        } else {
            self.text_main()
        }
    }

    /// Clear old results, lock down the console and run every selected test.
    pub fn run_automated_tests(&self) -> Result<RunAggregate> {
        if let Some(request) = ChildRequest::from_env() {
            process::run_child(&request, &self.registry, self.config.clone())?;
            return Ok(RunAggregate::default());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::runner("a test run is already in progress"));
        }
        let _running = RunningGuard(&self.running);

        self.context().begin_run();
        self.reporter.on_clear();
        if let Some(hook) = &self.flags.on_start {
            hook();
        }

        let aggregate = {
            let _lockdown = Lockdown::engage();
            self.runner.run_all(&self.registry)?
        };

        if let Some(hook) = &self.flags.on_end {
            hook(&aggregate);
        }
        Ok(aggregate)
    }

    /// Run the automated tests on a background thread.
    pub fn run_async(self: &Arc<Self>) -> Result<JoinHandle<Result<RunAggregate>>> {
        let grader = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("autograder-run".to_string())
            .spawn(move || grader.run_automated_tests())?;
        Ok(handle)
    }

    /// Run the student program on the real console with exiting intercepted.
    pub fn run_manually(&self) -> Result<i32> {
        let mut console = Console::stdio();
        self.run_manually_with(&mut console)
    }

    /// Run the student program on `console` with exiting intercepted.
    pub fn run_manually_with(&self, console: &mut Console) -> Result<i32> {
        let main = self.student_main()?;
        let _exit = ExitGuard::disable();
        match panic::catch_unwind(AssertUnwindSafe(|| main(console))) {
            Ok(status) => Ok(status),
            Err(payload) => match payload.downcast_ref::<StudentExit>() {
                Some(exit) => Err(Error::StudentExit {
                    status: exit.status,
                }),
                None => panic::resume_unwind(payload),
            },
        }
    }

    /// Run the student program on `input` and return its captured output.
    ///
    /// The output is also written to `output_file` when given.
    pub fn run_and_capture(&self, input: &str, output_file: Option<&Path>) -> Result<String> {
        let main = self.student_main()?;
        let runner = &self.config.runner;
        let (_, output) = capture::run_and_capture(
            |console| main(console),
            input,
            runner.output_limit,
            runner.capture_stderr,
        )?;
        if let Some(path) = output_file {
            std::fs::write(path, &output)?;
        }
        Ok(output)
    }

    fn student_main(&self) -> Result<StudentMain> {
        self.student_main
            .clone()
            .ok_or_else(|| Error::config("no student main function set"))
    }

    /// Source files to style check.
    ///
    /// Falls back to the student program file when no entries are configured.
    pub fn style_check_entries(&self) -> Vec<StyleCheckEntry> {
        if !self.config.style_checks.is_empty() {
            return self.config.style_checks.clone();
        }
        self.config
            .grader
            .student_program_file
            .iter()
            .map(|file| StyleCheckEntry {
                file: file.clone(),
                rules: None,
            })
            .collect()
    }

    /// Style check every configured source file and report the results.
    pub fn run_style_checker(&self) -> Vec<StyleReport> {
        let merged = self.config.grader.merge_style_checks;
        self.style_check_entries()
            .iter()
            .map(|entry| {
                let report = self.check_style(entry);
                self.reporter.on_style_check(&report, merged);
                report
            })
            .collect()
    }

    fn check_style(&self, entry: &StyleCheckEntry) -> StyleReport {
        let rules = entry
            .rules
            .clone()
            .unwrap_or_else(|| default_rules_file(&entry.file));
        self.style_checker.check(&entry.file, &rules)
    }

    /// Load the late-day file named in the configuration.
    pub fn late_days(&self) -> Result<LateDays> {
        Ok(LateDays::load(&self.config.grader.late_days_file)?)
    }

    /// Show the late-day information in the graphical window or the console.
    pub fn show_late_days(&self) -> Result<()> {
        let late_days = self.late_days()?;
        match &self.graphical {
            Some(panel) => panel.show_message("Late days", &late_days.html()),
            None => self
                .lock_prompter()
                .print(&late_days.console_text(OUTPUT_SEPARATOR)),
        }
        Ok(())
    }

    /// Show the about message.
    pub fn show_about(&self) {
        let about = self.flags.about_message();
        match &self.graphical {
            Some(panel) => panel.show_message(
                "About Autograder",
                &format!("<html>{}</html>", about.replace('\n', "<br>")),
            ),
            None => self.lock_prompter().print(&format!("{about}\n")),
        }
    }

    /// Text-mode flow: grade, offer manual runs and extras, then late days.
    pub fn text_main(&self) -> Result<i32> {
        let mut guard = self.lock_prompter();
        let prompter: &mut dyn Prompter = &mut **guard;
        prompter.print(&format!(
            "{} Autograder\n{OUTPUT_SEPARATOR}\n",
            self.flags.assignment_name
        ));

        let mut result = 0;
        if prompter.yes_or_no(&self.flags.autograde_prompt(), true) {
            let aggregate = self.run_automated_tests()?;
            if !aggregate.all_passed() {
                result = 1;
            }
            prompter.print(&format!("{OUTPUT_SEPARATOR}\n"));
            prompter.read_line("Press Enter to continue . . .");
        }

        if self.student_main.is_some()
            && prompter.yes_or_no("Run program for manual testing (y/N)? ", false)
        {
            loop {
                match self.run_manually() {
                    Ok(_) => {}
                    Err(Error::StudentExit { status }) => {
                        prompter.print(&format!("{}\n", StudentExit { status }.message()));
                    }
                    Err(e) => return Err(e),
                }
                prompter.print(&format!("{OUTPUT_SEPARATOR}\n"));
                if !prompter.yes_or_no("Run program again (y/N)? ", false) {
                    break;
                }
            }
        }
        prompter.print(&format!("{OUTPUT_SEPARATOR}\n"));

        for button in &self.flags.callback_buttons {
            if prompter.yes_or_no(&format!("{} (Y/n)? ", button.single_line_text()), true) {
                (button.func)();
            }
        }

        if !self.style_check_entries().is_empty()
            && prompter.yes_or_no("Run style checker (Y/n)? ", true)
        {
            for _ in self.run_style_checker() {
                prompter.print(&format!("{OUTPUT_SEPARATOR}\n"));
            }
        }

        if self.flags.show_late_days {
            let late_days = self.late_days()?;
            prompter.print(&late_days.console_text(OUTPUT_SEPARATOR));
        }

        prompter.print("COMPLETE: Autograder terminated successfully. Exiting.\n");
        Ok(result)
    }

    /// Graphical flow without a window toolkit driving it.
    ///
    /// Shows the start message, runs the tests, the style checker and the late
    /// days report through the sink, in that order.
    pub fn graphical_main(&self) -> Result<i32> {
        let panel = self
            .graphical
            .as_ref()
            .ok_or_else(|| Error::not_initialized("graphical reporter not attached"))?;
        panel.with_model(|model| {
            model.set_description(self.flags.assignment_name.clone());
        });
        if !self.flags.start_message.is_empty() {
            panel.show_message("Autograder", &start_message_html(&self.flags.start_message));
        }

        let aggregate = self.run_automated_tests()?;
        if !self.style_check_entries().is_empty() {
            self.run_style_checker();
        }
        if self.flags.show_late_days {
            self.show_late_days()?;
        }
        Ok(if aggregate.all_passed() { 0 } else { 1 })
    }

    /// Enable or disable a test for the next run.
    pub fn set_test_enabled(&self, full_name: &str, enabled: bool) -> bool {
        match &self.graphical {
            Some(panel) => panel.with_model(|model| model.set_checked(full_name, enabled)),
            None => self.registry.set_enabled(full_name, enabled),
        }
    }

    /// Every registered test, in run order.
    pub fn tests(&self) -> impl Iterator<Item = &Arc<TestDescriptor>> {
        self.registry.iter()
    }
}

impl std::fmt::Debug for Autograder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autograder")
            .field("flags", &self.flags)
            .field("tests", &self.registry.len())
            .field("reporter", &self.reporter.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::prompt::ScriptedPrompter;
    use crate::exit;
    use crate::outcome::Verdict;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.report.color = crate::config::ColorChoice::Never;
        config.grader.show_late_days = false;
        config
    }

    fn console_reporter(config: &Config) -> ConsoleReporter {
        ConsoleReporter::with_writer(&config.report, std::io::sink())
    }

    #[test]
    fn test_builder_error_missing_config() {
        let err = AutograderBuilder::new().build().err().expect("should fail");
        assert!(err.to_string().contains("no configuration"));
    }

    #[test]
    fn test_default_timeout_follows_env_override() {
        crate::config::env::tests::with_env_vars(&[("AUTOGRADER_TIMEOUT_MS", "75")], || {
            let _guard = exit::tests::SWITCH_LOCK
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let mut config = quiet_config();
            config.runner.default_timeout_ms = 250;
            crate::config::env::apply_env_overrides(&mut config);

            let grader = AutograderBuilder::new()
                .with_config(config.clone())
                .reporter(console_reporter(&config))
                .test_default("Basic", "spins", |ctx| {
                    while !ctx.is_cancelled() {
                        std::thread::sleep(std::time::Duration::from_millis(2));
                    }
                    Ok(())
                })
                .test("Basic", "explicit", 10, |_| Ok(()))
                .build()
                .unwrap();

            let spins = grader.registry().find("Basic_spins").unwrap();
            assert_eq!(spins.timeout_ms(), 75);
            assert!(spins.run_in_own_thread());
            let explicit = grader.registry().find("Basic_explicit").unwrap();
            assert_eq!(explicit.timeout_ms(), 10);

            let aggregate = grader.run_automated_tests().unwrap();
            assert_eq!(aggregate.passed, 1);
            let record = grader.context().board().get("Basic_spins").unwrap();
            assert_eq!(record.verdict, Verdict::Fail);
            assert!(
                record
                    .detail
                    .unwrap()
                    .message
                    .contains(crate::outcome::TIMEOUT_MESSAGE)
            );
        });
    }

    #[test]
    fn test_student_program_file_is_style_checked() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hello.cpp");
        std::fs::write(&source, "// greeting\nint main() { return 0; }\n").unwrap();
        std::fs::write(
            dir.path().join("stylecheck-hello-cpp.toml"),
            "[[pattern]]\nregex = \"//.*\"\ndescription = \"comments\"\nmin-count = 1\n",
        )
        .unwrap();

        let mut config = quiet_config();
        config.grader.student_program_file = Some(source.clone());
        let grader = AutograderBuilder::new()
            .with_config(config.clone())
            .reporter(console_reporter(&config))
            .build()
            .unwrap();

        let entries = grader.style_check_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file, source);
        let reports = grader.run_style_checker();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].error.is_none());
        assert_eq!(reports[0].total(), 1);
        assert_eq!(reports[0].passed_count(), 1);
    }

    #[test]
    fn test_run_automated_tests_with_hooks() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let starts = Arc::new(AtomicUsize::new(0));
        let totals = Arc::new(Mutex::new(None));
        let config = quiet_config();
        let grader = {
            let starts = Arc::clone(&starts);
            let totals = Arc::clone(&totals);
            AutograderBuilder::new()
                .with_config(config.clone())
                .reporter(console_reporter(&config))
                .test("Basic", "t1", 0, |ctx| {
                    ctx.assert_equals("answer", 42, 42);
                    Ok(())
                })
                .test("Basic", "t2", 0, |ctx| {
                    ctx.assert_equals("answer", 42, 43);
                    Ok(())
                })
                .on_start(move || {
                    starts.fetch_add(1, Ordering::SeqCst);
                })
                .on_end(move |aggregate| {
                    *totals.lock().unwrap() = Some(*aggregate);
                })
                .build()
                .unwrap()
        };

        let aggregate = grader.run_automated_tests().unwrap();
        assert_eq!(aggregate.passed, 1);
        assert_eq!(aggregate.total, 2);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(totals.lock().unwrap().unwrap(), aggregate);
        assert!(exit::is_exit_enabled());
        assert!(!grader.is_running());

        // A second run starts from a clean board.
        grader.set_test_enabled("Basic_t2", false);
        let again = grader.run_automated_tests().unwrap();
        assert_eq!(again.total, 1);
        assert_eq!(grader.context().board().verdict("Basic_t2"), Verdict::Unknown);
    }

    #[test]
    fn test_run_async_returns_totals() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let config = quiet_config();
        let grader = Arc::new(
            AutograderBuilder::new()
                .with_config(config.clone())
                .reporter(console_reporter(&config))
                .test("Basic", "t1", 100, |ctx| {
                    ctx.assert_true("ok", true);
                    Ok(())
                })
                .build()
                .unwrap(),
        );
        let handle = grader.run_async().unwrap();
        let aggregate = handle.join().unwrap().unwrap();
        assert_eq!(aggregate.passed, 1);
    }

    #[test]
    fn test_run_and_capture_writes_file() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let out_file = dir.path().join("out.txt");
        let grader = AutograderBuilder::new()
            .with_config(quiet_config())
            .reporter(console_reporter(&quiet_config()))
            .student_main(|console| {
                let name = console.read_line().ok().flatten().unwrap_or_default();
                let _ = writeln!(console, "Hello, {name}!");
                0
            })
            .build()
            .unwrap();
        let output = grader.run_and_capture("Ada\n", Some(&out_file)).unwrap();
        assert_eq!(output, "Hello, Ada!\n");
        assert_eq!(std::fs::read_to_string(&out_file).unwrap(), output);
    }

    #[test]
    fn test_run_manually_intercepts_exit() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let grader = AutograderBuilder::new()
            .with_config(quiet_config())
            .reporter(console_reporter(&quiet_config()))
            .student_main(|_| exit::exit(4))
            .build()
            .unwrap();
        let mut console = Console::from_parts(std::io::empty(), std::io::sink(), std::io::sink());
        let err = grader.run_manually_with(&mut console).unwrap_err();
        assert!(matches!(err, Error::StudentExit { status: 4 }));
        assert!(exit::is_exit_enabled());
    }

    #[test]
    fn test_missing_student_main() {
        let grader = AutograderBuilder::new()
            .with_config(quiet_config())
            .reporter(console_reporter(&quiet_config()))
            .build()
            .unwrap();
        assert!(grader.run_and_capture("", None).is_err());
    }

    #[test]
    fn test_text_main_transcript() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let clicked = Arc::new(AtomicBool::new(false));
        let mut config = quiet_config();
        config.grader.assignment_name = "Life".to_string();
        let dir = tempfile::tempdir().unwrap();
        config.grader.show_late_days = true;
        config.grader.late_days_file = dir.path().join("late_days.txt");

        let grader = {
            let clicked = Arc::clone(&clicked);
            AutograderBuilder::new()
                .with_config(config.clone())
                .reporter(console_reporter(&config))
                .test("Basic", "t1", 0, |_| Ok(()))
                .callback_button("Show\nDemo", move || clicked.store(true, Ordering::SeqCst))
                // grade, press enter, decline manual run, accept the callback
                .prompter(ScriptedPrompter::new(["y", "", "n", "y"]))
                .student_main(|_| 0)
                .build()
                .unwrap()
        };
        assert_eq!(grader.text_main().unwrap(), 0);
        assert!(clicked.load(Ordering::SeqCst));
    }

    #[test]
    fn test_text_main_prompts_in_order() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut config = quiet_config();
        config.grader.assignment_name = "Life".to_string();
        config.grader.start_message = "Note: read carefully.".to_string();
        let input = std::io::Cursor::new(b"n\nn\n".to_vec());
        let out = Arc::new(Mutex::new(Vec::new()));

        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let grader = AutograderBuilder::new()
            .with_config(config.clone())
            .reporter(console_reporter(&config))
            .prompter(LinePrompter::new(input, Shared(Arc::clone(&out))))
            .student_main(|_| 0)
            .build()
            .unwrap();
        assert_eq!(grader.text_main().unwrap(), 0);

        let transcript = String::from_utf8(out.lock().unwrap().clone()).unwrap();
        let expected = format!(
            "Life Autograder\n{OUTPUT_SEPARATOR}\n\
             Note: read carefully.\n\nAttempt auto-grading (Y/n)? \
             Run program for manual testing (y/N)? \
             {OUTPUT_SEPARATOR}\n\
             COMPLETE: Autograder terminated successfully. Exiting.\n"
        );
        assert_eq!(transcript, expected);
    }

    #[test]
    fn test_graphical_build_populates_panel() {
        let _guard = exit::tests::SWITCH_LOCK
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut config = quiet_config();
        config.grader.graphical = true;
        let grader = AutograderBuilder::new()
            .with_config(config)
            .test("Basic", "t1", 0, |_| Ok(()))
            .test("Basic", "t2", 0, |ctx| ctx.fail_now("nope"))
            .build()
            .unwrap();
        let panel = grader.graphical().unwrap();
        assert_eq!(panel.model().rows().count(), 2);

        assert_eq!(grader.main_func().unwrap(), 1);
        let model = panel.model();
        assert_eq!(model.row("Basic_t1").unwrap().verdict, Verdict::Pass);
        assert_eq!(model.row("Basic_t2").unwrap().verdict, Verdict::Fail);
        assert_eq!(model.status_text(), "passed 1 / 2 tests (complete)");
    }
}
