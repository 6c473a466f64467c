use super::{ExecStatus, Executor};
use crate::core::context::TestContext;
use crate::core::error::{Error, Result};
use crate::registry::TestDescriptor;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runs the body on a worker thread and abandons it on timeout.
///
/// An abandoned worker keeps running until its body returns. Its context is
/// cancelled and its output closed, and any outcome it reports later lands on
/// the result board under its own test name. Bodies that loop should poll
/// [`TestContext::is_cancelled`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadExecutor {
    poll_interval: Duration,
    catch_exceptions: bool,
}

impl ThreadExecutor {
    pub fn new(poll_interval: Duration, catch_exceptions: bool) -> Self {
        Self {
            poll_interval,
            catch_exceptions,
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, test: &TestDescriptor, ctx: &Arc<TestContext>) -> Result<ExecStatus> {
        let body = test.body();
        let worker_ctx = Arc::clone(ctx);
        let handle = std::thread::Builder::new()
            .name(format!("test-{}", test.full_name()))
            .spawn(move || panic::catch_unwind(AssertUnwindSafe(|| body(&worker_ctx))))
            .map_err(|e| {
                Error::runner(format!(
                    "failed to spawn worker for {}: {e}",
                    test.full_name()
                ))
            })?;

        let timeout = Duration::from_millis(test.timeout_ms());
        let deadline = Instant::now() + timeout;
        loop {
            if handle.is_finished() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                ctx.cancel();
                tracing::warn!(
                    test = test.full_name(),
                    "abandoning worker thread after {} ms",
                    timeout.as_millis()
                );
                return Ok(ExecStatus::TimedOut);
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }

        // The body runs under catch_unwind, so join only fails if that machinery did.
        let result = handle.join().unwrap_or_else(Err);
        Ok(ExecStatus::from_body_result(result, self.catch_exceptions))
    }

    fn name(&self) -> &str {
        "thread"
    }
}
