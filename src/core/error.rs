use std::path::PathBuf;

/// Result type alias for autograder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the autograder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Test lookup errors.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Runner execution errors.
    #[error("Runner error: {0}")]
    Runner(String),

    /// Style checker errors.
    #[error("Style check error: {0}")]
    StyleCheck(String),

    /// Tests were run before a reporter was attached.
    #[error("Harness not initialized: {0}")]
    NotInitialized(String),

    /// Captured output grew past the configured byte limit.
    #[error("Output limit of {limit} bytes exceeded")]
    OutputLimitExceeded { limit: usize },

    /// The program under test called `exit` while exiting was disabled.
    #[error("Student program called exit({status})")]
    StudentExit { status: i32 },

    /// File not found.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidConfig { field: String, value: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Regular expression error.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Error::Registry(msg.into())
    }

    /// Create a runner error.
    pub fn runner(msg: impl Into<String>) -> Self {
        Error::Runner(msg.into())
    }

    /// Create a style check error.
    pub fn style_check(msg: impl Into<String>) -> Self {
        Error::StyleCheck(msg.into())
    }

    /// Create a not-initialized error.
    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Error::NotInitialized(msg.into())
    }

    /// Create an invalid configuration value error.
    pub fn invalid_config(field: impl Into<String>, value: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Failure signal raised by a test body.
///
/// Test bodies return `Result<(), TestError>` so that hard assertions can stop
/// the body with `?`, and so that code under test can surface structured errors
/// that become EXCEPTION outcomes.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// A structured runtime error raised by the code under test.
    #[error("{message}")]
    Raised {
        message: String,
        stack_trace: Option<String>,
    },

    /// A hard assertion failed; its outcome has already been reported.
    #[error("test aborted after failed assertion")]
    Aborted,
}

impl TestError {
    /// Create a raised error without a stack trace.
    pub fn raised(message: impl Into<String>) -> Self {
        TestError::Raised {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Create a raised error and capture the current stack trace.
    pub fn raised_with_trace(message: impl Into<String>) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        let stack_trace = match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        TestError::Raised {
            message: message.into(),
            stack_trace,
        }
    }
}

impl From<Error> for TestError {
    fn from(err: Error) -> Self {
        TestError::raised(err.to_string())
    }
}

impl From<std::io::Error> for TestError {
    fn from(err: std::io::Error) -> Self {
        TestError::raised(err.to_string())
    }
}
