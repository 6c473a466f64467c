//! Regex-based style checking of student source files.
//!
//! Rules live in a TOML file next to the source, `stylecheck-foo-cpp.toml` for
//! `Foo.cpp` by default:
//!
//! ```toml
//! omit-on-pass = true
//!
//! [[pattern]]
//! regex = "//.*"
//! description = "comments"
//! min-count = 18
//! list = false
//!
//! [[category]]
//! name = "Forbidden"
//!
//! [[category.pattern]]
//! regex = "goto(:SPACE:)"
//! description = "goto statements"
//! max-count = 0
//! fail-type = "fail"
//! ```
//!
//! Results are reported as [`OutcomeKind::StyleCheck`] outcomes through the
//! same reporter pipeline as unit tests.

use crate::core::error::{Error, Result};
use crate::outcome::{OutcomeKind, TestOutcome, ValueType, Verdict};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound used when a rule gives no maximum.
pub const DEFAULT_MAX_COUNT: usize = 999_999_999;

/// Category given to top-level patterns.
pub const DEFAULT_CATEGORY: &str = "Style";

const MACROS: [(&str, &str); 5] = [
    ("(:IDENTIFIER:)", "(?:[a-zA-Z_$][a-zA-Z0-9_$]{0,255})"),
    ("(:IDENT:)", "(?:[a-zA-Z_$][a-zA-Z0-9_$]{0,255})"),
    ("(:SPACES:)", "(?:[ \\t]{0,999})"),
    ("(:SPACE:)", "(?:[ \\t])"),
    (
        "(:TEMPLATE:)",
        "(?:<[ \\t]{0,255}[a-zA-Z_$][a-zA-Z0-9_$]{0,255}[ \\t]{0,255}>)",
    ),
];

/// How a failing check is graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailType {
    #[default]
    Warn,
    Fail,
}

/// A rules file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleRules {
    /// Hide checks that pass.
    #[serde(default = "default_true", rename = "omit-on-pass")]
    pub omit_on_pass: bool,

    #[serde(default, rename = "pattern")]
    pub patterns: Vec<PatternRule>,

    #[serde(default, rename = "category")]
    pub categories: Vec<RuleCategory>,
}

impl StyleRules {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Every rule with its category, top-level rules first.
    pub fn rules(&self) -> impl Iterator<Item = (&str, &PatternRule)> {
        self.patterns
            .iter()
            .map(|rule| ("", rule))
            .chain(self.categories.iter().flat_map(|category| {
                category
                    .patterns
                    .iter()
                    .map(move |rule| (category.name.as_str(), rule))
            }))
    }
}

/// A named group of patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCategory {
    pub name: String,

    #[serde(default, rename = "pattern")]
    pub patterns: Vec<PatternRule>,
}

/// One pattern and how often it may occur.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub regex: String,

    /// Defaults to the expanded regex.
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, rename = "min-count")]
    pub min_count: Option<usize>,

    #[serde(default, rename = "max-count")]
    pub max_count: Option<usize>,

    /// Sets both the minimum and the maximum.
    #[serde(default)]
    pub count: Option<usize>,

    /// Report the lines that matched.
    #[serde(default = "default_true")]
    pub list: bool,

    #[serde(default = "default_true", rename = "show-counts")]
    pub show_counts: bool,

    #[serde(default, rename = "fail-type")]
    pub fail_type: FailType,
}

impl PatternRule {
    /// The regex with `(:IDENTIFIER:)`-style macros expanded.
    pub fn expanded_regex(&self) -> String {
        MACROS
            .iter()
            .fold(self.regex.clone(), |acc, (name, expansion)| {
                acc.replace(name, expansion)
            })
    }

    /// Inclusive bounds on the number of matches.
    pub fn bounds(&self) -> (usize, usize) {
        match self.count {
            Some(count) => (count, count),
            None => (
                self.min_count.unwrap_or(0),
                self.max_count.unwrap_or(DEFAULT_MAX_COUNT),
            ),
        }
    }

    /// Match the rule against `text`.
    pub fn evaluate(&self, category: &str, text: &str) -> Result<StyleResult> {
        let (min_count, max_count) = self.bounds();
        if min_count > max_count {
            return Err(Error::style_check(format!(
                "pattern {:?} requires at least {min_count} but at most {max_count} matches",
                self.regex
            )));
        }
        let expanded = self.expanded_regex();
        let regex = Regex::new(&expanded)?;

        let mut count = 0;
        let mut lines: Vec<usize> = Vec::new();
        for found in regex.find_iter(text) {
            count += 1;
            if self.list {
                let line = text[..found.start()].matches('\n').count() + 1;
                if lines.last() != Some(&line) {
                    lines.push(line);
                }
            }
        }

        Ok(StyleResult {
            category: category.to_string(),
            description: self.description.clone().unwrap_or(expanded),
            min_count,
            max_count,
            count,
            lines,
            show_counts: self.show_counts,
            fail_type: self.fail_type,
        })
    }
}

/// Result of one pattern against one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleResult {
    /// Rule category; empty for top-level patterns.
    pub category: String,
    pub description: String,
    pub min_count: usize,
    pub max_count: usize,
    pub count: usize,
    /// Lines with at least one match, when the rule lists them.
    pub lines: Vec<usize>,
    pub show_counts: bool,
    pub fail_type: FailType,
}

impl StyleResult {
    pub fn passed(&self) -> bool {
        if self.min_count > 0 && self.count == 0 {
            return false;
        }
        if self.max_count == 0 && self.count > 0 {
            return false;
        }
        self.min_count <= self.count && self.count <= self.max_count
    }

    pub fn verdict(&self) -> Verdict {
        match (self.passed(), self.fail_type) {
            (true, _) => Verdict::Pass,
            (false, FailType::Warn) => Verdict::Warn,
            (false, FailType::Fail) => Verdict::Fail,
        }
    }

    /// How often the pattern should occur, in words.
    pub fn range_text(&self) -> String {
        let (min, max) = (self.min_count, self.max_count);
        if min == max {
            format!("should occur exactly {min} times")
        } else if min == 0 && max > 0 && max != DEFAULT_MAX_COUNT {
            format!("should occur <= {max} times")
        } else if max == DEFAULT_MAX_COUNT && min > 0 {
            format!("should occur >= {min} times")
        } else {
            format!("should be between {min}-{max} times")
        }
    }

    /// How often the pattern actually occurred, in words.
    pub fn student_text(&self) -> String {
        let mut text = format!("actually occurs {} time(s)", self.count);
        if !self.lines.is_empty() {
            let lines: Vec<String> = self.lines.iter().map(usize::to_string).collect();
            text.push_str(" on line ");
            text.push_str(&lines.join(", "));
        }
        text
    }

    pub fn to_outcome(&self) -> TestOutcome {
        let mut outcome = TestOutcome::compared(
            OutcomeKind::StyleCheck,
            self.description.as_str(),
            self.range_text(),
            self.student_text(),
            ValueType::Other,
            self.passed(),
        );
        outcome.verdict = self.verdict();
        outcome
    }

    /// Category and test name of this check in the results view.
    ///
    /// Merged checks go in one category per file; otherwise each check name
    /// is prefixed with the file name.
    pub fn placement(&self, file_name: &str, merged: bool) -> (String, String) {
        let category = if self.category.is_empty() {
            DEFAULT_CATEGORY
        } else {
            self.category.as_str()
        };
        if merged {
            let test = if self.category.is_empty() {
                self.description.clone()
            } else {
                format!("[{}] {}", self.category, self.description)
            };
            (format!("Style Checker: {file_name}"), test)
        } else {
            (
                format!("[{file_name}] {category}"),
                format!("[{file_name}] {}", self.description),
            )
        }
    }
}

/// Results of checking one source file against one rules file.
#[derive(Debug, Clone, Serialize)]
pub struct StyleReport {
    pub source: PathBuf,
    pub rules: PathBuf,
    pub omit_on_pass: bool,
    pub results: Vec<StyleResult>,
    /// Set when the check could not run; the message is shown instead of results.
    pub error: Option<String>,
}

impl StyleReport {
    fn failed(source: &Path, rules: &Path, error: String) -> Self {
        tracing::warn!(source = %source.display(), %error, "style check could not run");
        Self {
            source: source.to_path_buf(),
            rules: rules.to_path_buf(),
            omit_on_pass: true,
            results: Vec::new(),
            error: Some(error),
        }
    }

    /// File name of the checked source, for display.
    pub fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }

    pub fn header(&self) -> String {
        format!(
            "STYLE CHECK for {} based on rules in {}:",
            self.source.display(),
            self.rules.display()
        )
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Results to display, honoring `omit_on_pass`.
    pub fn visible(&self) -> impl Iterator<Item = &StyleResult> {
        self.results
            .iter()
            .filter(|r| !r.passed() || !self.omit_on_pass)
    }
}

/// Checks a source file against a rules file.
pub trait StyleChecker: Send + Sync {
    /// Run the check. Problems are reported in [`StyleReport::error`], never raised.
    fn check(&self, source: &Path, rules: &Path) -> StyleReport;

    /// Get a human-readable name for this checker.
    fn name(&self) -> &str;
}

/// Style checker for TOML rule files.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexStyleChecker;

impl RegexStyleChecker {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(source_text: &str, rules: &StyleRules) -> Result<Vec<StyleResult>> {
        rules
            .rules()
            .map(|(category, rule)| rule.evaluate(category, source_text))
            .collect()
    }
}

impl StyleChecker for RegexStyleChecker {
    fn check(&self, source: &Path, rules_path: &Path) -> StyleReport {
        if !source.exists() {
            return StyleReport::failed(
                source,
                rules_path,
                format!(
                    "Student code file \"{}\" not found in build folder. Exiting.",
                    source.display()
                ),
            );
        }
        if !rules_path.exists() {
            return StyleReport::failed(
                source,
                rules_path,
                format!(
                    "Style checklist file \"{}\" not found in build folder. Exiting.",
                    rules_path.display()
                ),
            );
        }

        let loaded = std::fs::read_to_string(source)
            .map_err(Error::from)
            .and_then(|text| StyleRules::from_file(rules_path).map(|rules| (text, rules)));
        let (text, rules) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return StyleReport::failed(source, rules_path, e.to_string()),
        };

        match Self::evaluate(&text, &rules) {
            Ok(results) => {
                tracing::debug!(
                    source = %source.display(),
                    checks = results.len(),
                    "style check complete"
                );
                StyleReport {
                    source: source.to_path_buf(),
                    rules: rules_path.to_path_buf(),
                    omit_on_pass: rules.omit_on_pass,
                    results,
                    error: None,
                }
            }
            Err(e) => StyleReport::failed(source, rules_path, e.to_string()),
        }
    }

    fn name(&self) -> &str {
        "regex"
    }
}

/// Default rules file for a source file: `dir/Foo.cpp` becomes `dir/stylecheck-foo-cpp.toml`.
pub fn default_rules_file(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase().replace('.', "-"))
        .unwrap_or_default();
    source.with_file_name(format!("stylecheck-{name}.toml"))
}

fn default_true() -> bool {
    true
}
