//! Configuration types and loading from a standalone `autograder.toml`.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod env;
mod loader;
pub use loader::{ConfigLoader, DEFAULT_CONFIG_FILE};

/// Complete configuration for an autograder.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Assignment and presentation settings.
    #[serde(default)]
    pub grader: GraderConfig,

    /// Test execution settings.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Result reporting settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Which tests run.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Source files checked by the style checker.
    #[serde(default, rename = "style-check")]
    pub style_checks: Vec<StyleCheckEntry>,

    /// Enable verbose progress output.
    #[serde(default)]
    pub verbose: bool,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Assignment and presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderConfig {
    /// Shown in the title and the text-mode header.
    #[serde(default, rename = "assignment-name")]
    pub assignment_name: String,

    /// Extra text appended to the default "about" message.
    #[serde(default, rename = "about-text")]
    pub about_text: Option<String>,

    /// Message shown before grading starts.
    #[serde(default, rename = "start-message")]
    pub start_message: String,

    /// Use the graphical reporter instead of the console.
    #[serde(default)]
    pub graphical: bool,

    #[serde(default = "default_true", rename = "show-late-days")]
    pub show_late_days: bool,

    #[serde(default = "default_late_days_file", rename = "late-days-file")]
    pub late_days_file: PathBuf,

    /// The student's main source file, style checked when no
    /// `[[style-check]]` entries are configured.
    #[serde(default, rename = "student-program-file")]
    pub student_program_file: Option<PathBuf>,

    /// Report style checks inside the unit-test categories.
    #[serde(default, rename = "merge-style-checks")]
    pub merge_style_checks: bool,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            assignment_name: String::new(),
            about_text: None,
            start_message: String::new(),
            graphical: false,
            show_late_days: true,
            late_days_file: default_late_days_file(),
            student_program_file: None,
            merge_style_checks: false,
        }
    }
}

/// How test bodies are isolated from the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Run every body on the runner thread; timeouts are not enforced.
    None,
    /// Run timed bodies on a worker thread that is abandoned on timeout.
    #[default]
    Thread,
    /// Run timed bodies in a child process that is killed on timeout.
    Process,
}

impl std::str::FromStr for Isolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Isolation::None),
            "thread" => Ok(Isolation::Thread),
            "process" => Ok(Isolation::Process),
            _ => Err(Error::invalid_config("runner.isolation", s)),
        }
    }
}

/// Test execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Timeout given to tests registered with `AutograderBuilder::test_default`.
    #[serde(default = "default_timeout_ms", rename = "default-timeout-ms")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub isolation: Isolation,

    /// Turn errors escaping a test body into EXCEPTION outcomes.
    ///
    /// When off, a panicking body takes down the whole run.
    #[serde(default = "default_true", rename = "catch-exceptions")]
    pub catch_exceptions: bool,

    /// How often the runner checks whether an isolated test finished.
    #[serde(default = "default_poll_interval_ms", rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Maximum bytes of output captured per test; 0 disables the limit.
    #[serde(default = "default_output_limit", rename = "output-limit")]
    pub output_limit: usize,

    #[serde(default = "default_true", rename = "capture-stderr")]
    pub capture_stderr: bool,

    /// Echo captured output to the terminal as it is produced.
    #[serde(default, rename = "echo-output")]
    pub echo_output: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            isolation: Isolation::default(),
            catch_exceptions: true,
            poll_interval_ms: default_poll_interval_ms(),
            output_limit: default_output_limit(),
            capture_stderr: true,
            echo_output: false,
        }
    }
}

/// When the console reporter uses colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    /// Resolve against whether stdout is a terminal.
    pub fn should_colorize(self) -> bool {
        use std::io::IsTerminal;
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::stdout().is_terminal(),
        }
    }
}

/// Result reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Failures printed per test on the console; 0 prints them all.
    #[serde(default = "default_fails_to_print", rename = "fails-to-print-per-test")]
    pub fails_to_print_per_test: usize,

    /// Column width of test names on the console.
    #[serde(default = "default_test_name_width", rename = "test-name-width")]
    pub test_name_width: usize,

    #[serde(default)]
    pub color: ColorChoice,

    /// Longest expected/actual value shown in graphical details.
    #[serde(default = "default_max_value_display", rename = "max-value-display-length")]
    pub max_value_display_length: usize,

    /// Runtimes below this are not shown in the graphical rows.
    #[serde(default = "default_min_runtime_ms", rename = "min-runtime-to-display-ms")]
    pub min_runtime_to_display_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            fails_to_print_per_test: default_fails_to_print(),
            test_name_width: default_test_name_width(),
            color: ColorChoice::default(),
            max_value_display_length: default_max_value_display(),
            min_runtime_to_display_ms: default_min_runtime_ms(),
        }
    }
}

/// Whitelist/blacklist of test full names.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SelectionConfig {
    /// If non-empty, only these tests run.
    #[serde(default)]
    pub only: Vec<String>,

    /// These tests never run.
    #[serde(default)]
    pub skip: Vec<String>,
}

impl SelectionConfig {
    /// Whether the selection lets `full_name` run.
    pub fn allows(&self, full_name: &str) -> bool {
        if self.skip.iter().any(|s| s == full_name) {
            return false;
        }
        self.only.is_empty() || self.only.iter().any(|s| s == full_name)
    }
}

/// A source file to style check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StyleCheckEntry {
    pub file: PathBuf,

    /// Rules file; derived from the source file name when absent.
    #[serde(default)]
    pub rules: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_late_days_file() -> PathBuf {
    PathBuf::from("late_days.txt")
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_output_limit() -> usize {
    1_000_000
}

fn default_fails_to_print() -> usize {
    1
}

fn default_test_name_width() -> usize {
    64
}

fn default_max_value_display() -> usize {
    150
}

fn default_min_runtime_ms() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();
        assert!(config.grader.assignment_name.is_empty());
        assert!(config.grader.show_late_days);
        assert!(!config.grader.graphical);
        assert_eq!(config.grader.late_days_file, PathBuf::from("late_days.txt"));
        assert_eq!(config.runner.default_timeout_ms, 5000);
        assert_eq!(config.runner.isolation, Isolation::Thread);
        assert!(config.runner.catch_exceptions);
        assert_eq!(config.runner.poll_interval_ms, 10);
        assert_eq!(config.runner.output_limit, 1_000_000);
        assert_eq!(config.report.fails_to_print_per_test, 1);
        assert_eq!(config.report.test_name_width, 64);
        assert_eq!(config.report.max_value_display_length, 150);
        assert_eq!(config.report.min_runtime_to_display_ms, 10);
        assert!(config.selection.only.is_empty());
        assert!(config.style_checks.is_empty());
        assert!(!config.verbose);
    }

    #[test]
    fn test_config_deserialize_minimal() {
        let config = Config::from_toml_str(
            r#"
        [grader]
        assignment-name = "Life"
        "#,
        )
        .unwrap();
        assert_eq!(config.grader.assignment_name, "Life");
        assert!(config.grader.show_late_days);
        assert_eq!(config.runner.default_timeout_ms, 5000);
    }

    #[test]
    fn test_config_deserialize_full() {
        let config = Config::from_toml_str(
            r#"
        verbose = true

        [grader]
        assignment-name = "Boggle"
        about-text = "Boggle grader"
        start-message = "Note: check the lexicon."
        graphical = true
        show-late-days = false
        late-days-file = "days.txt"
        merge-style-checks = true

        [runner]
        default-timeout-ms = 2000
        isolation = "process"
        catch-exceptions = false
        poll-interval-ms = 5
        output-limit = 4096
        capture-stderr = false
        echo-output = true

        [report]
        fails-to-print-per-test = 3
        test-name-width = 40
        color = "never"

        [selection]
        only = ["Basic_t1"]
        skip = ["Basic_t2"]

        [[style-check]]
        file = "boggle.cpp"

        [[style-check]]
        file = "main.cpp"
        rules = "rules/main.toml"
        "#,
        )
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.grader.assignment_name, "Boggle");
        assert_eq!(config.grader.about_text.as_deref(), Some("Boggle grader"));
        assert!(config.grader.graphical);
        assert!(!config.grader.show_late_days);
        assert_eq!(config.grader.late_days_file, PathBuf::from("days.txt"));
        assert!(config.grader.merge_style_checks);
        assert_eq!(config.runner.default_timeout_ms, 2000);
        assert_eq!(config.runner.isolation, Isolation::Process);
        assert!(!config.runner.catch_exceptions);
        assert_eq!(config.runner.poll_interval_ms, 5);
        assert_eq!(config.runner.output_limit, 4096);
        assert!(!config.runner.capture_stderr);
        assert!(config.runner.echo_output);
        assert_eq!(config.report.fails_to_print_per_test, 3);
        assert_eq!(config.report.test_name_width, 40);
        assert_eq!(config.report.color, ColorChoice::Never);
        assert_eq!(config.selection.only, vec!["Basic_t1"]);
        assert_eq!(config.style_checks.len(), 2);
        assert_eq!(config.style_checks[0].rules, None);
        assert_eq!(
            config.style_checks[1].rules,
            Some(PathBuf::from("rules/main.toml"))
        );
    }

    #[test]
    fn test_config_deserialize_invalid_isolation() {
        let result = Config::from_toml_str(
            r#"
        [runner]
        isolation = "fork"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_isolation_from_str() {
        assert_eq!("Process".parse::<Isolation>().unwrap(), Isolation::Process);
        assert_eq!("none".parse::<Isolation>().unwrap(), Isolation::None);
        assert!("fork".parse::<Isolation>().is_err());
    }

    #[test]
    fn test_selection_allows() {
        let mut selection = SelectionConfig::default();
        assert!(selection.allows("Basic_t1"));

        selection.skip.push("Basic_t1".to_string());
        assert!(!selection.allows("Basic_t1"));

        selection.only.push("Basic_t2".to_string());
        assert!(selection.allows("Basic_t2"));
        assert!(!selection.allows("Basic_t3"));
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = Config::from_toml_file("/nonexistent/autograder.toml").unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }

    #[test]
    fn test_color_choice_explicit() {
        assert!(ColorChoice::Always.should_colorize());
        assert!(!ColorChoice::Never.should_colorize());
    }
}
