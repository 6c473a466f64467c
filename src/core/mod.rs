//! Core types for the grading session: builder, contexts, flags, prompts, and error handling.

pub mod builder;
pub mod context;
pub mod error;
pub mod flags;
pub mod prompt;

pub use builder::{Autograder, AutograderBuilder, StudentMain};
pub use context::{AssertValue, RunContext, TestContext};
pub use error::{Error, Result, TestError};
pub use flags::{AutograderFlags, CallbackButton};
pub use prompt::{LinePrompter, Prompter, ScriptedPrompter};
