//! Ordered table of test categories and the tests registered in them.

use crate::core::context::TestContext;
use crate::core::error::TestError;
use indexmap::IndexMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Signature of a test body.
pub type TestBody = Arc<dyn Fn(&TestContext) -> Result<(), TestError> + Send + Sync>;

/// One registered test.
pub struct TestDescriptor {
    category: String,
    name: String,
    full_name: String,
    timeout_ms: AtomicU64,
    own_thread: AtomicBool,
    enabled: AtomicBool,
    body: TestBody,
}

impl TestDescriptor {
    fn new(category: &str, name: &str, timeout_ms: u64, body: TestBody) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            full_name: full_name(category, name),
            timeout_ms: AtomicU64::new(timeout_ms),
            own_thread: AtomicBool::new(timeout_ms > 0),
            enabled: AtomicBool::new(true),
            body,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category and name joined into the run-wide unique identifier.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Timeout in milliseconds; 0 means no timeout.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.load(Ordering::SeqCst)
    }

    pub fn set_timeout_ms(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::SeqCst);
        if timeout_ms == 0 {
            self.own_thread.store(false, Ordering::SeqCst);
        }
    }

    /// Whether the body runs isolated from the runner thread.
    ///
    /// Defaults to true unless the timeout is 0.
    pub fn run_in_own_thread(&self) -> bool {
        self.own_thread.load(Ordering::SeqCst) && self.timeout_ms() > 0
    }

    pub fn set_run_in_own_thread(&self, own_thread: bool) {
        self.own_thread.store(own_thread, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn body(&self) -> TestBody {
        Arc::clone(&self.body)
    }
}

impl std::fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("full_name", &self.full_name)
            .field("timeout_ms", &self.timeout_ms())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Build the full name of a test from its category and name.
pub fn full_name(category: &str, name: &str) -> String {
    if category.is_empty() {
        name.to_string()
    } else {
        format!("{category}_{name}")
    }
}

/// A named group of tests, in registration order.
#[derive(Debug)]
pub struct TestCategory {
    name: String,
    description: String,
    tests: Vec<Arc<TestDescriptor>>,
}

impl TestCategory {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tests(&self) -> &[Arc<TestDescriptor>] {
        &self.tests
    }
}

/// Ordered mapping of category name to registered tests.
///
/// Categories keep first-seen order and tests keep registration order.
/// Registering the same name twice keeps both entries; outcomes are tracked
/// per full name, so the runner reports them under one row.
#[derive(Debug, Default)]
pub struct TestRegistry {
    categories: IndexMap<String, TestCategory>,
}

impl TestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test body under `category`, creating the category if needed.
    pub fn add<F>(
        &mut self,
        category: &str,
        name: &str,
        body: F,
        timeout_ms: u64,
    ) -> Arc<TestDescriptor>
    where
        F: Fn(&TestContext) -> Result<(), TestError> + Send + Sync + 'static,
    {
        let descriptor = Arc::new(TestDescriptor::new(
            category,
            name,
            timeout_ms,
            Arc::new(body),
        ));
        self.category_entry(category)
            .tests
            .push(Arc::clone(&descriptor));
        tracing::trace!(test = descriptor.full_name(), "registered test");
        descriptor
    }

    /// Set the human-readable description of a category, creating it if needed.
    pub fn describe_category(&mut self, category: &str, description: impl Into<String>) {
        self.category_entry(category).description = description.into();
    }

    fn category_entry(&mut self, category: &str) -> &mut TestCategory {
        self.categories
            .entry(category.to_string())
            .or_insert_with(|| TestCategory {
                name: category.to_string(),
                description: String::new(),
                tests: Vec::new(),
            })
    }

    /// All categories in first-registered order.
    pub fn categories(&self) -> impl Iterator<Item = &TestCategory> {
        self.categories.values()
    }

    /// Category names in first-registered order.
    pub fn category_names(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }

    pub fn category(&self, category: &str) -> Option<&TestCategory> {
        self.categories.get(category)
    }

    /// Test names of `category` in registration order.
    pub fn test_names(&self, category: &str) -> Vec<&str> {
        self.categories
            .get(category)
            .map(|c| c.tests.iter().map(|t| t.name()).collect())
            .unwrap_or_default()
    }

    /// Every registered test, category order then registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TestDescriptor>> {
        self.categories.values().flat_map(|c| c.tests.iter())
    }

    /// Find the first test registered under `full_name`.
    pub fn find(&self, full_name: &str) -> Option<&Arc<TestDescriptor>> {
        self.iter().find(|t| t.full_name() == full_name)
    }

    /// Enable or disable every test registered under `full_name`.
    ///
    /// Returns false if no such test exists.
    pub fn set_enabled(&self, full_name: &str, enabled: bool) -> bool {
        let mut found = false;
        for test in self.iter().filter(|t| t.full_name() == full_name) {
            test.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Enable or disable every test in a category.
    pub fn set_category_enabled(&self, category: &str, enabled: bool) {
        if let Some(c) = self.categories.get(category) {
            for test in &c.tests {
                test.set_enabled(enabled);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(|c| c.tests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
