//! Reading and presenting the late-day information file.
//!
//! The file is a list of `key: value` lines written by the submission system:
//!
//! ```text
//! student_submission_time: 13/Oct/2014 10:31:15
//! assignment_due_time: 12/Oct/2014 23:59:00
//! calendar_days_late: 1
//! ```
//!
//! A missing file is not an error; it yields placeholder values and a note.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub const SUBMISSION_TIME_KEY: &str = "student_submission_time";
pub const DUE_TIME_KEY: &str = "assignment_due_time";
pub const DAYS_LATE_KEY: &str = "calendar_days_late";
pub const DETAILS_KEY: &str = "details";

/// Shown in place of a date that cannot be parsed.
pub const INVALID_DATE: &str = "INVALID DATE STRING";

const UNKNOWN: &str = "unknown";
const INPUT_FORMAT: &str = "%d/%b/%Y %H:%M:%S";
const OUTPUT_FORMAT: &str = "%a, %b %-d, %Y, %-I:%M %p";

/// Parsed contents of a late-day file.
#[derive(Debug, Clone)]
pub struct LateDays {
    pub path: PathBuf,
    /// Raw text of the file, or the placeholder text when it is missing.
    pub text: String,
    pub found: bool,
    entries: IndexMap<String, String>,
}

impl LateDays {
    /// Load the file at `path`, falling back to placeholders if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "late day file not found");
            return Ok(Self::placeholder(path));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(path, text, true))
    }

    fn placeholder(path: &Path) -> Self {
        let text = format!(
            "{SUBMISSION_TIME_KEY}: {UNKNOWN}\n\
             {DUE_TIME_KEY}: {UNKNOWN}\n\
             {DAYS_LATE_KEY}: {UNKNOWN}\n\
             {DETAILS_KEY}: {} not found!",
            path.display()
        );
        Self::parse(path, text, false)
    }

    fn parse(path: &Path, text: String, found: bool) -> Self {
        let mut entries = IndexMap::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once(": ") {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self {
            path: path.to_path_buf(),
            text,
            found,
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Due time, reformatted for display.
    pub fn due_time(&self) -> String {
        self.display_date(DUE_TIME_KEY)
    }

    /// Submission time, reformatted for display.
    pub fn submission_time(&self) -> String {
        self.display_date(SUBMISSION_TIME_KEY)
    }

    pub fn days_late(&self) -> &str {
        self.get(DAYS_LATE_KEY).unwrap_or("")
    }

    pub fn details(&self) -> Option<&str> {
        self.get(DETAILS_KEY).filter(|d| !d.is_empty())
    }

    fn display_date(&self, key: &str) -> String {
        match self.get(key) {
            Some(UNKNOWN) => UNKNOWN.to_string(),
            Some(value) => format_date(value),
            None => String::new(),
        }
    }

    /// Plain-text rendering for the console.
    pub fn console_text(&self, separator: &str) -> String {
        let mut out = String::new();
        out.push_str(separator);
        out.push('\n');
        out.push_str(&format!("Contents of {}:\n", self.path.display()));
        out.push_str(&self.text);
        if !self.text.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(separator);
        out.push('\n');
        out
    }

    /// HTML table rendering for the graphical interface.
    pub fn html(&self) -> String {
        let mut message = String::from("<html><table>");
        if let Some(details) = self.details() {
            message.push_str(&format!("<tr><td><b>NOTE:</b></td><td>{details}</td></tr>"));
        }
        message.push_str(&format!("<tr><td><b>due</b></td><td>{}</td></tr>", self.due_time()));
        message.push_str(&format!(
            "<tr><td><b>submitted</b></td><td>{}</td></tr>",
            self.submission_time()
        ));
        message.push_str(&format!(
            "<tr><td><b>cal.days late</b></td><td>{}</td></tr>",
            self.days_late()
        ));
        message.push_str("</table></html>");
        message
    }
}

/// Reformat `13/Oct/2014 10:31:15` as `Mon, Oct 13, 2014, 10:31 AM`.
pub fn format_date(value: &str) -> String {
    match NaiveDateTime::parse_from_str(value.trim(), INPUT_FORMAT) {
        Ok(date) => date.format(OUTPUT_FORMAT).to_string(),
        Err(_) => INVALID_DATE.to_string(),
    }
}
