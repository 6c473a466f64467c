use super::{ExecStatus, Executor};
use crate::core::context::TestContext;
use crate::core::error::Result;
use crate::registry::TestDescriptor;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Runs the body on the calling thread. Timeouts are not enforced.
#[derive(Debug, Clone, Copy)]
pub struct InlineExecutor {
    catch_exceptions: bool,
}

impl InlineExecutor {
    pub fn new(catch_exceptions: bool) -> Self {
        Self { catch_exceptions }
    }
}

impl Default for InlineExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, test: &TestDescriptor, ctx: &Arc<TestContext>) -> Result<ExecStatus> {
        let body = test.body();
        let result = panic::catch_unwind(AssertUnwindSafe(|| body(ctx)));
        Ok(ExecStatus::from_body_result(result, self.catch_exceptions))
    }

    fn name(&self) -> &str {
        "inline"
    }
}
