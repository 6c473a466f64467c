//! Per-test result records shared between the runner, test threads and reporters.

use crate::outcome::{Applied, RunAggregate, TestOutcome, Verdict, apply_outcome};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Everything recorded about one test in the current session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestRecord {
    pub full_name: String,
    pub verdict: Verdict,
    /// The detail shown for the test: the first failure, or the latest outcome while passing.
    pub detail: Option<TestOutcome>,
    /// Number of failing or warning outcomes reported.
    pub failures: usize,
    /// Number of outcomes reported.
    pub assertions: usize,
    #[serde(skip)]
    pub elapsed: Option<Duration>,
    /// Output captured while the test ran.
    pub output: String,
}

impl TestRecord {
    fn new(full_name: &str) -> Self {
        Self {
            full_name: full_name.to_string(),
            ..Self::default()
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.map(|d| d.as_millis()).unwrap_or(0)
    }
}

/// Thread-safe table of [`TestRecord`]s keyed by full name, in first-touched order.
///
/// Outcomes may arrive from an abandoned test thread after the runner has moved
/// on, so every mutation goes through the lock and the sticky-failure rule.
#[derive(Debug, Default)]
pub struct ResultBoard {
    records: Mutex<IndexMap<String, TestRecord>>,
}

impl ResultBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, TestRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget every record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Mark a test as running, discarding anything recorded for it earlier.
    pub fn start(&self, full_name: &str) {
        let mut record = TestRecord::new(full_name);
        record.verdict = Verdict::Running;
        self.lock().insert(full_name.to_string(), record);
    }

    /// Fold an outcome into the test's record.
    pub fn apply(&self, full_name: &str, outcome: &TestOutcome) -> Applied {
        let mut records = self.lock();
        let record = records
            .entry(full_name.to_string())
            .or_insert_with(|| TestRecord::new(full_name));
        let applied = apply_outcome(record.verdict, outcome);
        record.verdict = applied.verdict;
        record.assertions += 1;
        if !outcome.passed() {
            record.failures += 1;
        }
        if applied.replace_detail {
            record.detail = Some(outcome.clone());
        }
        applied
    }

    /// Close a test: a test that reported nothing failing passes.
    pub fn finish(&self, full_name: &str, elapsed: Duration, output: String) -> TestRecord {
        let mut records = self.lock();
        let record = records
            .entry(full_name.to_string())
            .or_insert_with(|| TestRecord::new(full_name));
        if !record.verdict.is_terminal() {
            record.verdict = Verdict::Pass;
        }
        record.elapsed = Some(elapsed);
        record.output = output;
        record.clone()
    }

    pub fn get(&self, full_name: &str) -> Option<TestRecord> {
        self.lock().get(full_name).cloned()
    }

    pub fn verdict(&self, full_name: &str) -> Verdict {
        self.lock()
            .get(full_name)
            .map(|r| r.verdict)
            .unwrap_or_default()
    }

    /// All records in first-touched order.
    pub fn records(&self) -> Vec<TestRecord> {
        self.lock().values().cloned().collect()
    }

    /// Recount the aggregate from the current verdicts.
    pub fn aggregate(&self) -> RunAggregate {
        let mut aggregate = RunAggregate::default();
        for record in self.lock().values() {
            aggregate.record(record.verdict);
        }
        aggregate
    }
}
