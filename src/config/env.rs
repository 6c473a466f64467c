//! Environment variable processing for runtime configuration overrides.
//!
//! Env var prefix: `AUTOGRADER_`
//!
//! - `AUTOGRADER_PROFILE`: select a configuration profile
//! - `AUTOGRADER_TIMEOUT_MS`: override the default test timeout
//! - `AUTOGRADER_ISOLATION`: override isolation (none/thread/process)
//! - `AUTOGRADER_CATCH_EXCEPTIONS`: catch errors escaping test bodies (1/true/yes or 0/false/no)
//! - `AUTOGRADER_OUTPUT_LIMIT`: override the captured output byte limit
//! - `AUTOGRADER_FAILS_TO_PRINT`: override failures printed per test
//! - `AUTOGRADER_GRAPHICAL`: use the graphical reporter
//! - `AUTOGRADER_ONLY`: comma-separated whitelist of test full names
//! - `AUTOGRADER_SKIP`: comma-separated blacklist of test full names
//! - `AUTOGRADER_VERBOSE`: enable verbose output

use super::{Config, Isolation};

const PREFIX: &str = "AUTOGRADER_";

const OVERRIDE_KEYS: [&str; 9] = [
    "TIMEOUT_MS",
    "ISOLATION",
    "CATCH_EXCEPTIONS",
    "OUTPUT_LIMIT",
    "FAILS_TO_PRINT",
    "GRAPHICAL",
    "ONLY",
    "SKIP",
    "VERBOSE",
];

/// Read the active profile name from `AUTOGRADER_PROFILE`.
pub fn get_profile_name() -> Option<String> {
    env_str("PROFILE")
}

/// Apply individual env var overrides to a config.
///
/// Each override is applied only if the env var is set and parses correctly.
/// Invalid values are silently ignored.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(val) = env_parse::<u64>("TIMEOUT_MS") {
        config.runner.default_timeout_ms = val;
    }

    if let Some(val) = env_parse::<Isolation>("ISOLATION") {
        config.runner.isolation = val;
    }

    if let Some(val) = env_bool("CATCH_EXCEPTIONS") {
        config.runner.catch_exceptions = val;
    }

    if let Some(val) = env_parse::<usize>("OUTPUT_LIMIT") {
        config.runner.output_limit = val;
    }

    if let Some(val) = env_parse::<usize>("FAILS_TO_PRINT") {
        config.report.fails_to_print_per_test = val;
    }

    if let Some(val) = env_bool("GRAPHICAL") {
        config.grader.graphical = val;
    }

    if let Some(val) = env_list("ONLY") {
        config.selection.only = val;
    }

    if let Some(val) = env_list("SKIP") {
        config.selection.skip = val;
    }

    if let Some(val) = env_bool("VERBOSE") {
        config.verbose = val;
    }
}

/// Summarize which env var overrides are currently active.
///
/// Returns a list of `(env_var_name, value)` pairs for display in `check`.
pub fn detect_active_overrides() -> Vec<(String, String)> {
    let mut active = Vec::new();
    for key in std::iter::once("PROFILE").chain(OVERRIDE_KEYS) {
        let full = format!("{PREFIX}{key}");
        if let Ok(val) = std::env::var(&full) {
            if !val.is_empty() {
                active.push((full, val));
            }
        }
    }
    active
}

// --- helpers ---

fn env_str(suffix: &str) -> Option<String> {
    std::env::var(format!("{PREFIX}{suffix}"))
        .ok()
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(suffix: &str) -> Option<T> {
    env_str(suffix).and_then(|s| s.trim().parse().ok())
}

fn env_bool(suffix: &str) -> Option<bool> {
    env_str(suffix).map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_list(suffix: &str) -> Option<Vec<String>> {
    env_str(suffix).map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global, so serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Helper: run a closure with specific env vars set, then restore.
    pub(crate) fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut old: Vec<(&str, Option<String>)> = Vec::new();
        for &(k, v) in vars {
            old.push((k, std::env::var(k).ok()));
            // SAFETY: tests are serialized via ENV_LOCK
            unsafe { std::env::set_var(k, v) };
        }
        f();
        for (k, prev) in old {
            // SAFETY: tests are serialized via ENV_LOCK
            match prev {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    /// Helper: run with specific env vars removed.
    fn without_env_vars<F: FnOnce()>(vars: &[&str], f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut old: Vec<(&str, Option<String>)> = Vec::new();
        for &k in vars {
            old.push((k, std::env::var(k).ok()));
            // SAFETY: tests are serialized via ENV_LOCK
            unsafe { std::env::remove_var(k) };
        }
        f();
        for (k, prev) in old {
            // SAFETY: tests are serialized via ENV_LOCK
            match prev {
                Some(v) => unsafe { std::env::set_var(k, v) },
                None => unsafe { std::env::remove_var(k) },
            }
        }
    }

    #[test]
    fn test_get_profile_name_set() {
        with_env_vars(&[("AUTOGRADER_PROFILE", "debug")], || {
            assert_eq!(get_profile_name(), Some("debug".to_string()));
        });
    }

    #[test]
    fn test_get_profile_name_unset() {
        without_env_vars(&["AUTOGRADER_PROFILE"], || {
            assert_eq!(get_profile_name(), None);
        });
    }

    #[test]
    fn test_get_profile_name_empty() {
        with_env_vars(&[("AUTOGRADER_PROFILE", "")], || {
            assert_eq!(get_profile_name(), None);
        });
    }

    #[test]
    fn test_apply_env_overrides_runner_fields() {
        with_env_vars(
            &[
                ("AUTOGRADER_TIMEOUT_MS", "250"),
                ("AUTOGRADER_ISOLATION", "process"),
                ("AUTOGRADER_CATCH_EXCEPTIONS", "no"),
                ("AUTOGRADER_OUTPUT_LIMIT", "64"),
            ],
            || {
                let mut config = Config::default();
                apply_env_overrides(&mut config);
                assert_eq!(config.runner.default_timeout_ms, 250);
                assert_eq!(config.runner.isolation, Isolation::Process);
                assert!(!config.runner.catch_exceptions);
                assert_eq!(config.runner.output_limit, 64);
            },
        );
    }

    #[test]
    fn test_apply_env_overrides_report_and_grader() {
        with_env_vars(
            &[
                ("AUTOGRADER_FAILS_TO_PRINT", "0"),
                ("AUTOGRADER_GRAPHICAL", "yes"),
                ("AUTOGRADER_VERBOSE", "1"),
            ],
            || {
                let mut config = Config::default();
                apply_env_overrides(&mut config);
                assert_eq!(config.report.fails_to_print_per_test, 0);
                assert!(config.grader.graphical);
                assert!(config.verbose);
            },
        );
    }

    #[test]
    fn test_apply_env_overrides_selection_lists() {
        with_env_vars(
            &[
                ("AUTOGRADER_ONLY", "Basic_t1, Basic_t2,"),
                ("AUTOGRADER_SKIP", "Slow_loop"),
            ],
            || {
                let mut config = Config::default();
                apply_env_overrides(&mut config);
                assert_eq!(config.selection.only, vec!["Basic_t1", "Basic_t2"]);
                assert_eq!(config.selection.skip, vec!["Slow_loop"]);
            },
        );
    }

    #[test]
    fn test_apply_env_overrides_invalid_timeout_ignored() {
        with_env_vars(&[("AUTOGRADER_TIMEOUT_MS", "notanumber")], || {
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            assert_eq!(config.runner.default_timeout_ms, 5000);
        });
    }

    #[test]
    fn test_apply_env_overrides_invalid_isolation_ignored() {
        with_env_vars(&[("AUTOGRADER_ISOLATION", "fork")], || {
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            assert_eq!(config.runner.isolation, Isolation::Thread);
        });
    }

    #[test]
    fn test_detect_active_overrides() {
        with_env_vars(&[("AUTOGRADER_TIMEOUT_MS", "100")], || {
            let active = detect_active_overrides();
            assert!(
                active
                    .iter()
                    .any(|(k, v)| k == "AUTOGRADER_TIMEOUT_MS" && v == "100")
            );
        });
    }
}
