//! Headless model of the graphical results window.
//!
//! [`PanelModel`] holds everything the window shows: category panels, one row
//! per test with its checkbox, status, runtime and details, and the status line.
//! Rendering is left to a [`UiSink`], which is told whenever something visible
//! changes. Without a toolkit attached the [`NullSink`] drops the updates and
//! the model can be inspected directly.

use super::{Reporter, TestInfo};
use crate::config::ReportConfig;
use crate::outcome::{RunAggregate, TestOutcome, ValueType, Verdict, apply_outcome, next_verdict};
use crate::registry::{TestRegistry, full_name};
use crate::results::TestRecord;
use crate::style::StyleReport;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Receives updates for the parts of the window that changed.
pub trait UiSink: Send + Sync {
    fn row_changed(&self, row: &TestRow) {
        let _ = row;
    }

    fn status_changed(&self, text: &str) {
        let _ = text;
    }

    /// The details pane of a row was opened (`Some`) or closed (`None`).
    fn details_changed(&self, full_name: &str, html: Option<&str>) {
        let _ = (full_name, html);
    }

    /// Show a message dialog.
    fn show_message(&self, title: &str, html: &str) {
        let _ = (title, html);
    }
}

/// Sink that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl UiSink for NullSink {}

/// One test row.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRow {
    pub index: usize,
    pub category: String,
    pub name: String,
    pub full_name: String,
    /// Whether the test runs next time.
    pub checked: bool,
    pub verdict: Verdict,
    /// Runtime, if long enough to be worth showing.
    pub runtime_ms: Option<u128>,
    pub detail: Option<TestOutcome>,
    pub details_visible: bool,
    pub style_check: bool,
}

impl TestRow {
    /// Runtime text next to the test name, e.g. ` (12 ms)`.
    pub fn runtime_label(&self) -> String {
        self.runtime_ms
            .map(|ms| format!(" ({ms} ms)"))
            .unwrap_or_default()
    }
}

/// A collapsible group of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPanel {
    pub name: String,
    pub description: String,
    pub hidden: bool,
    /// Full names of the rows, in display order.
    pub tests: Vec<String>,
}

/// State of the results window.
#[derive(Debug, Clone)]
pub struct PanelModel {
    categories: IndexMap<String, CategoryPanel>,
    rows: IndexMap<String, TestRow>,
    registry: Option<Arc<TestRegistry>>,
    description: String,
    in_progress: bool,
    completed: bool,
    max_value_length: usize,
    min_runtime_ms: u64,
}

impl PanelModel {
    pub fn new(report: &ReportConfig) -> Self {
        Self {
            categories: IndexMap::new(),
            rows: IndexMap::new(),
            registry: None,
            description: String::new(),
            in_progress: false,
            completed: false,
            max_value_length: report.max_value_display_length,
            min_runtime_ms: report.min_runtime_to_display_ms,
        }
    }

    /// Add a panel and a row for every registered test.
    ///
    /// Checkboxes write through to the registry's enabled flags afterwards.
    pub fn populate(&mut self, registry: Arc<TestRegistry>) {
        for category in registry.categories() {
            self.add_category(category.name()).description = category.description().to_string();
            for test in category.tests() {
                let row = self.add_test(test.category(), test.name(), false);
                row.checked = test.is_enabled();
            }
        }
        self.registry = Some(registry);
    }

    pub fn add_category(&mut self, name: &str) -> &mut CategoryPanel {
        self.categories
            .entry(name.to_string())
            .or_insert_with(|| CategoryPanel {
                name: name.to_string(),
                description: String::new(),
                hidden: false,
                tests: Vec::new(),
            })
    }

    /// Add a row, or return the existing row with the same full name.
    pub fn add_test(&mut self, category: &str, name: &str, style_check: bool) -> &mut TestRow {
        let full = full_name(category, name);
        if !self.rows.contains_key(&full) {
            self.add_category(category).tests.push(full.clone());
        }
        let index = self.rows.len() + 1;
        self.rows.entry(full.clone()).or_insert_with(|| TestRow {
            index,
            category: category.to_string(),
            name: name.to_string(),
            full_name: full,
            checked: true,
            verdict: Verdict::Unknown,
            runtime_ms: None,
            detail: None,
            details_visible: false,
            style_check,
        })
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryPanel> {
        self.categories.values()
    }

    pub fn category(&self, name: &str) -> Option<&CategoryPanel> {
        self.categories.get(name)
    }

    pub fn rows(&self) -> impl Iterator<Item = &TestRow> {
        self.rows.values()
    }

    pub fn row(&self, full_name: &str) -> Option<&TestRow> {
        self.rows.get(full_name)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Text shown above the panels.
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Tick or untick a row, enabling or disabling the test for the next run.
    pub fn set_checked(&mut self, full_name: &str, checked: bool) -> bool {
        let Some(row) = self.rows.get_mut(full_name) else {
            return false;
        };
        row.checked = checked;
        if let Some(registry) = &self.registry {
            registry.set_enabled(full_name, checked);
        }
        true
    }

    pub fn is_checked(&self, full_name: &str) -> bool {
        self.rows.get(full_name).is_some_and(|r| r.checked)
    }

    /// Tick or untick every row of a category.
    pub fn select_all(&mut self, category: &str, checked: bool) {
        let tests = self
            .categories
            .get(category)
            .map(|c| c.tests.clone())
            .unwrap_or_default();
        for test in tests {
            self.set_checked(&test, checked);
        }
    }

    /// Collapse or expand a category panel.
    pub fn toggle_hidden(&mut self, category: &str) {
        if let Some(panel) = self.categories.get_mut(category) {
            panel.hidden = !panel.hidden;
        }
    }

    pub fn minimize(&mut self, category: &str, hidden: bool) {
        if let Some(panel) = self.categories.get_mut(category) {
            panel.hidden = hidden;
        }
    }

    pub fn minimize_all(&mut self, hidden: bool) {
        for panel in self.categories.values_mut() {
            panel.hidden = hidden;
        }
    }

    /// Rows that will run next time.
    pub fn checked_count(&self) -> usize {
        self.rows.values().filter(|r| r.checked).count()
    }

    pub fn pass_count(&self) -> usize {
        self.rows
            .values()
            .filter(|r| r.verdict == Verdict::Pass)
            .count()
    }

    /// Reset a row for a new attempt.
    pub fn start_test(&mut self, full_name: &str) {
        if let Some(row) = self.rows.get_mut(full_name) {
            row.verdict = Verdict::Running;
            row.detail = None;
            row.runtime_ms = None;
        }
    }

    /// Set the row's status. A failed or warned row only moves to failed.
    pub fn set_test_result(&mut self, full_name: &str, verdict: Verdict) {
        if let Some(row) = self.rows.get_mut(full_name) {
            row.verdict = next_verdict(row.verdict, verdict, false);
        }
    }

    /// Store an outcome as the row's detail.
    ///
    /// Ignored when the row already failed or warned, unless the outcome
    /// requests an overwrite. Failing outcomes also update the status.
    pub fn set_test_details(&mut self, full_name: &str, outcome: &TestOutcome) -> bool {
        let Some(row) = self.rows.get_mut(full_name) else {
            return false;
        };
        let applied = apply_outcome(row.verdict, outcome);
        if !outcome.passed() {
            row.verdict = applied.verdict;
        }
        if applied.replace_detail {
            row.detail = Some(outcome.clone());
        }
        applied.replace_detail
    }

    pub fn set_test_runtime(&mut self, full_name: &str, ms: u128) {
        let min = u128::from(self.min_runtime_ms);
        if let Some(row) = self.rows.get_mut(full_name) {
            row.runtime_ms = (ms >= min).then_some(ms);
        }
    }

    /// Forget every result but keep the rows and their checkboxes.
    pub fn clear_test_results(&mut self) {
        for row in self.rows.values_mut() {
            row.verdict = Verdict::Unknown;
            row.runtime_ms = None;
            row.detail = None;
            row.details_visible = false;
        }
        self.in_progress = false;
        self.completed = false;
    }

    /// Remove every row and panel.
    pub fn clear_tests(&mut self) {
        self.rows.clear();
        self.categories.clear();
    }

    pub fn set_in_progress(&mut self) {
        self.in_progress = true;
        self.completed = false;
    }

    pub fn set_testing_completed(&mut self, completed: bool) {
        self.completed = completed;
        if completed {
            self.in_progress = false;
        }
    }

    /// Open or close a row's details pane, returning its HTML when opened.
    pub fn toggle_details(&mut self, full_name: &str) -> Option<String> {
        let row = self.rows.get_mut(full_name)?;
        row.details_visible = !row.details_visible;
        if row.details_visible {
            self.details_html(full_name)
        } else {
            None
        }
    }

    /// HTML for a row's details pane, if it has a detail.
    pub fn details_html(&self, full_name: &str) -> Option<String> {
        let row = self.rows.get(full_name)?;
        let detail = row.detail.as_ref()?;
        Some(render_details(detail, row.verdict, self.max_value_length))
    }

    /// Status line, e.g. `passed 3 / 5 tests (running ...)`.
    pub fn status_text(&self) -> String {
        let mut text = format!(
            "passed {} / {} tests",
            self.pass_count(),
            self.checked_count()
        );
        if self.in_progress {
            text.push_str(" (running ...)");
        } else if self.completed {
            text.push_str(" (complete)");
        }
        text
    }
}

/// Wrap a start message for display, bolding `Note:` unless it is already HTML.
pub fn start_message_html(message: &str) -> String {
    if message.contains("<html>") {
        return message.to_string();
    }
    let message = message
        .replace("Note:", "<b>Note:</b>")
        .replace("NOTE:", "<b>NOTE:</b>");
    format!("<html><body style='width: 500px; max-width: 500px;'>{message}</body></html>")
}

fn render_details(outcome: &TestOutcome, verdict: Verdict, max_len: usize) -> String {
    let mut message = outcome.message.clone();
    if let Some(suffix) = outcome.kind.detail_suffix() {
        message.push(' ');
        message.push_str(suffix);
    }

    let mut html = format!("<html><body><p>{}</p>", escape_html(&message).replace('\n', "<br>\n"));
    if !outcome.expected.is_empty() || !outcome.actual.is_empty() {
        html.push_str("<ul>");
        html.push_str(&format!(
            "<li>expected:&nbsp;{}</li>",
            display_value(&outcome.expected, outcome.value_type, max_len)
        ));
        html.push_str(&format!(
            "<li>student&nbsp;:&nbsp;{}</li>",
            display_value(&outcome.actual, outcome.value_type, max_len)
        ));
        html.push_str("</ul>");
    }
    let result = match verdict {
        Verdict::Pass => "PASS",
        Verdict::Warn => "WARNING",
        Verdict::Fail => "FAIL",
        Verdict::Unknown | Verdict::Running => "RUNNING",
    };
    html.push_str(&format!("<p>result: <b>{result}</b></p></body></html>"));
    html
}

fn display_value(value: &str, value_type: ValueType, max_len: usize) -> String {
    if value_type == ValueType::Diff {
        return format!("<pre>{}</pre>", escape_html(&truncate(value, max_len)));
    }
    let printable: String = value
        .chars()
        .map(|c| match c {
            '\n' => "\\n".to_string(),
            '\r' => "\\r".to_string(),
            '\t' => "\\t".to_string(),
            c if c.is_control() => format!("\\x{:02x}", u32::from(c)),
            c => c.to_string(),
        })
        .collect();
    escape_html(&value_type.quote(&truncate(&printable, max_len)))
}

fn truncate(value: &str, max_len: usize) -> String {
    if max_len == 0 || value.chars().count() <= max_len {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max_len).collect();
    cut.push_str(" ...");
    cut
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Reporter driving a [`PanelModel`] and forwarding changes to a [`UiSink`].
pub struct GraphicalReporter {
    model: Mutex<PanelModel>,
    sink: Arc<dyn UiSink>,
}

impl GraphicalReporter {
    pub fn new(report: &ReportConfig, sink: Arc<dyn UiSink>) -> Self {
        Self {
            model: Mutex::new(PanelModel::new(report)),
            sink,
        }
    }

    /// Create a reporter with rows for every test in `registry`.
    pub fn with_registry(
        report: &ReportConfig,
        registry: Arc<TestRegistry>,
        sink: Arc<dyn UiSink>,
    ) -> Self {
        let reporter = Self::new(report, sink);
        reporter.with_model(|model| model.populate(registry));
        reporter
    }

    fn lock(&self) -> MutexGuard<'_, PanelModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the model, as a UI event handler would.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut PanelModel) -> R) -> R {
        f(&mut self.lock())
    }

    /// A copy of the current model.
    pub fn model(&self) -> PanelModel {
        self.lock().clone()
    }

    pub fn sink(&self) -> &Arc<dyn UiSink> {
        &self.sink
    }

    /// Show a message dialog through the sink.
    pub fn show_message(&self, title: &str, html: &str) {
        self.sink.show_message(title, html);
    }

    fn publish_row(&self, model: &PanelModel, full_name: &str) {
        if let Some(row) = model.row(full_name) {
            self.sink.row_changed(row);
            if row.details_visible {
                self.sink
                    .details_changed(full_name, model.details_html(full_name).as_deref());
            }
        }
    }
}

impl Reporter for GraphicalReporter {
    fn on_run_start(&self, _selected: usize) {
        let mut model = self.lock();
        model.set_in_progress();
        self.sink.status_changed(&model.status_text());
    }

    fn on_test_start(&self, info: &TestInfo) {
        let mut model = self.lock();
        model.add_test(&info.category, &info.name, false);
        model.start_test(&info.full_name);
        self.publish_row(&model, &info.full_name);
    }

    fn on_detail(&self, info: &TestInfo, outcome: &TestOutcome) {
        let mut model = self.lock();
        model.set_test_details(&info.full_name, outcome);
        self.publish_row(&model, &info.full_name);
    }

    fn on_test_end(&self, info: &TestInfo, record: &TestRecord) {
        let mut model = self.lock();
        model.set_test_result(&info.full_name, record.verdict);
        model.set_test_runtime(&info.full_name, record.elapsed_ms());
        self.publish_row(&model, &info.full_name);
        self.sink.status_changed(&model.status_text());
    }

    fn on_summary(&self, _aggregate: &RunAggregate) {
        let mut model = self.lock();
        model.set_testing_completed(true);
        self.sink.status_changed(&model.status_text());
    }

    fn on_clear(&self) {
        let mut model = self.lock();
        model.clear_test_results();
        for row in model.rows() {
            self.sink.row_changed(row);
        }
        self.sink.status_changed(&model.status_text());
    }

    fn on_style_check(&self, report: &StyleReport, merged: bool) {
        if let Some(error) = &report.error {
            self.sink
                .show_message("Style Checker", &format!("<html>{}</html>", escape_html(error)));
            return;
        }
        let file_name = report.file_name();
        let mut model = self.lock();
        for result in report.visible() {
            let (category, test) = result.placement(&file_name, merged);
            let full = model.add_test(&category, &test, true).full_name.clone();
            model.start_test(&full);
            model.set_test_details(&full, &result.to_outcome());
            model.set_test_result(&full, result.verdict());
            self.publish_row(&model, &full);
        }
        self.sink.status_changed(&model.status_text());
    }

    fn name(&self) -> &str {
        "graphical"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;

    fn model_with(tests: &[(&str, &str)]) -> PanelModel {
        let mut model = PanelModel::new(&ReportConfig::default());
        for (category, name) in tests {
            model.add_test(category, name, false);
        }
        model
    }

    fn outcome(message: &str, passed: bool) -> TestOutcome {
        TestOutcome::compared(
            OutcomeKind::AssertEquals,
            message,
            "42",
            if passed { "42" } else { "43" },
            ValueType::Int,
            passed,
        )
    }

    #[test]
    fn test_rows_grouped_by_category() {
        let model = model_with(&[("Basic", "t1"), ("Extra", "e1"), ("Basic", "t2")]);
        let basic = model.category("Basic").unwrap();
        assert_eq!(basic.tests, vec!["Basic_t1", "Basic_t2"]);
        assert_eq!(model.row("Extra_e1").unwrap().index, 2);
        assert_eq!(model.checked_count(), 3);
    }

    #[test]
    fn test_add_test_is_idempotent() {
        let mut model = model_with(&[("Basic", "t1")]);
        model.add_test("Basic", "t1", false);
        assert_eq!(model.rows().count(), 1);
        assert_eq!(model.category("Basic").unwrap().tests.len(), 1);
    }

    #[test]
    fn test_fail_then_pass_details_stay_failed() {
        let mut model = model_with(&[("Basic", "t2")]);
        model.start_test("Basic_t2");
        assert!(model.set_test_details("Basic_t2", &outcome("first", false)));
        assert!(!model.set_test_details("Basic_t2", &outcome("second", true)));
        model.set_test_result("Basic_t2", Verdict::Pass);

        let row = model.row("Basic_t2").unwrap();
        assert_eq!(row.verdict, Verdict::Fail);
        assert_eq!(row.detail.as_ref().unwrap().message, "first");

        let mut overwrite = outcome("third", false);
        overwrite.overwrite = true;
        assert!(model.set_test_details("Basic_t2", &overwrite));
        assert_eq!(model.row("Basic_t2").unwrap().detail.as_ref().unwrap().message, "third");
    }

    #[test]
    fn test_warn_row_only_moves_to_fail() {
        let mut model = model_with(&[("Style", "s")]);
        model.set_test_result("Style_s", Verdict::Warn);
        model.set_test_result("Style_s", Verdict::Pass);
        assert_eq!(model.row("Style_s").unwrap().verdict, Verdict::Warn);
        model.set_test_result("Style_s", Verdict::Fail);
        assert_eq!(model.row("Style_s").unwrap().verdict, Verdict::Fail);
    }

    #[test]
    fn test_late_failure_overrides_pass() {
        let mut model = model_with(&[("Basic", "t1")]);
        model.start_test("Basic_t1");
        model.set_test_result("Basic_t1", Verdict::Pass);
        model.set_test_details("Basic_t1", &outcome("late", false));
        assert_eq!(model.row("Basic_t1").unwrap().verdict, Verdict::Fail);
    }

    #[test]
    fn test_status_text_and_pass_count() {
        let mut model = model_with(&[("Basic", "t1"), ("Basic", "t2"), ("Basic", "t3")]);
        model.set_checked("Basic_t3", false);
        model.set_in_progress();
        model.set_test_result("Basic_t1", Verdict::Pass);
        assert_eq!(model.status_text(), "passed 1 / 2 tests (running ...)");
        model.set_testing_completed(true);
        assert_eq!(model.status_text(), "passed 1 / 2 tests (complete)");
        model.clear_test_results();
        assert_eq!(model.status_text(), "passed 0 / 2 tests");
    }

    #[test]
    fn test_runtime_label_threshold() {
        let mut model = model_with(&[("Basic", "fast"), ("Basic", "slow")]);
        model.set_test_runtime("Basic_fast", 9);
        model.set_test_runtime("Basic_slow", 10);
        assert_eq!(model.row("Basic_fast").unwrap().runtime_label(), "");
        assert_eq!(model.row("Basic_slow").unwrap().runtime_label(), " (10 ms)");
    }

    #[test]
    fn test_select_all_writes_through_to_registry() {
        let mut registry = TestRegistry::new();
        let t1 = registry.add("Basic", "t1", |_| Ok(()), 0);
        let t2 = registry.add("Basic", "t2", |_| Ok(()), 0);
        let mut model = PanelModel::new(&ReportConfig::default());
        model.populate(Arc::new(registry));

        model.select_all("Basic", false);
        assert!(!t1.is_enabled());
        assert!(!t2.is_enabled());
        assert_eq!(model.checked_count(), 0);

        model.set_checked("Basic_t2", true);
        assert!(t2.is_enabled());
    }

    #[test]
    fn test_minimize() {
        let mut model = model_with(&[("Basic", "t1"), ("Extra", "e1")]);
        model.toggle_hidden("Basic");
        assert!(model.category("Basic").unwrap().hidden);
        model.minimize_all(false);
        assert!(model.categories().all(|c| !c.hidden));
    }

    #[test]
    fn test_details_html() {
        let mut model = model_with(&[("Basic", "t2")]);
        model.start_test("Basic_t2");
        model.set_test_details(
            "Basic_t2",
            &TestOutcome::compared(
                OutcomeKind::AssertEquals,
                "a < b",
                "x\ny",
                "z",
                ValueType::String,
                false,
            ),
        );
        let html = model.toggle_details("Basic_t2").unwrap();
        assert!(html.contains("<p>a &lt; b (must be equal)</p>"));
        assert!(html.contains("<li>expected:&nbsp;&quot;x\\ny&quot;</li>"));
        assert!(html.contains("<li>student&nbsp;:&nbsp;&quot;z&quot;</li>"));
        assert!(html.contains("result: <b>FAIL</b>"));
        assert!(model.toggle_details("Basic_t2").is_none());
    }

    #[test]
    fn test_truncate_long_values() {
        let long = "a".repeat(200);
        let shown = truncate(&long, 150);
        assert_eq!(shown.len(), 154);
        assert!(shown.ends_with(" ..."));
        assert_eq!(truncate("short", 150), "short");
    }

    #[test]
    fn test_start_message_html() {
        assert_eq!(
            start_message_html("Note: be kind"),
            "<html><body style='width: 500px; max-width: 500px;'><b>Note:</b> be kind</body></html>"
        );
        assert_eq!(start_message_html("<html>raw</html>"), "<html>raw</html>");
    }

    #[derive(Default)]
    struct CountingSink {
        rows: Mutex<usize>,
        status: Mutex<Vec<String>>,
    }

    impl UiSink for CountingSink {
        fn row_changed(&self, _: &TestRow) {
            *self.rows.lock().unwrap() += 1;
        }

        fn status_changed(&self, text: &str) {
            self.status.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn test_reporter_forwards_to_sink() {
        let sink = Arc::new(CountingSink::default());
        let reporter = GraphicalReporter::new(&ReportConfig::default(), sink.clone());
        let info = TestInfo {
            index: 1,
            category: "Basic".to_string(),
            name: "t1".to_string(),
            full_name: "Basic_t1".to_string(),
            timeout_ms: 0,
        };
        reporter.on_run_start(1);
        reporter.on_test_start(&info);
        reporter.on_detail(&info, &outcome("ok", true));
        reporter.on_test_end(
            &info,
            &TestRecord {
                verdict: Verdict::Pass,
                ..TestRecord::default()
            },
        );
        reporter.on_summary(&RunAggregate::default());

        assert_eq!(reporter.model().row("Basic_t1").unwrap().verdict, Verdict::Pass);
        assert_eq!(*sink.rows.lock().unwrap(), 3);
        assert_eq!(
            sink.status.lock().unwrap().last().unwrap(),
            "passed 1 / 1 tests (complete)"
        );
    }
}
