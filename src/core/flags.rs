use crate::config::GraderConfig;
use crate::outcome::RunAggregate;
use std::sync::Arc;

/// First lines of the "about" message.
pub const DEFAULT_ABOUT_TEXT: &str = "Autograder Framework\nGrading engine for student programs";

/// Separator printed between sections of the text-mode transcript.
pub const OUTPUT_SEPARATOR: &str =
    "============================================================";

/// Hook run before a test run starts.
pub type StartHook = Arc<dyn Fn() + Send + Sync>;

/// Hook run after a test run finishes.
pub type EndHook = Arc<dyn Fn(&RunAggregate) + Send + Sync>;

/// An extra action offered to the grader after the automated tests.
#[derive(Clone)]
pub struct CallbackButton {
    /// Label; may contain newlines for multi-line buttons.
    pub text: String,
    pub func: Arc<dyn Fn() + Send + Sync>,
}

impl CallbackButton {
    pub fn new<F>(text: impl Into<String>, func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            text: text.into(),
            func: Arc::new(func),
        }
    }

    /// Label on one line, as used in console prompts.
    pub fn single_line_text(&self) -> String {
        self.text.replace('\n', " ")
    }
}

impl std::fmt::Debug for CallbackButton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackButton")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// Presentation settings and hooks of one autograder, fixed at build time.
#[derive(Clone, Default)]
pub struct AutograderFlags {
    pub assignment_name: String,
    /// Text added below the default about message.
    pub about_text: Option<String>,
    pub start_message: String,
    pub graphical: bool,
    pub show_late_days: bool,
    pub callback_buttons: Vec<CallbackButton>,
    pub on_start: Option<StartHook>,
    pub on_end: Option<EndHook>,
}

impl AutograderFlags {
    pub fn from_config(config: &GraderConfig) -> Self {
        Self {
            assignment_name: config.assignment_name.clone(),
            about_text: config.about_text.clone(),
            start_message: config.start_message.clone(),
            graphical: config.graphical,
            show_late_days: config.show_late_days,
            ..Self::default()
        }
    }

    /// The full "about" message.
    pub fn about_message(&self) -> String {
        let mut text = format!(
            "{DEFAULT_ABOUT_TEXT}\nVersion: {}",
            env!("CARGO_PKG_VERSION")
        );
        if let Some(extra) = &self.about_text {
            text.push_str("\n==================================\n");
            text.push_str(extra);
        }
        text
    }

    /// The question asked before grading, with the start message above it.
    pub fn autograde_prompt(&self) -> String {
        let mut prompt = self.start_message.clone();
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str("Attempt auto-grading (Y/n)? ");
        prompt
    }
}

impl std::fmt::Debug for AutograderFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutograderFlags")
            .field("assignment_name", &self.assignment_name)
            .field("graphical", &self.graphical)
            .field("show_late_days", &self.show_late_days)
            .field("callback_buttons", &self.callback_buttons)
            .finish_non_exhaustive()
    }
}
