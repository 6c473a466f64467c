use super::Config;
use crate::core::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File read when no configuration file is named explicitly.
pub const DEFAULT_CONFIG_FILE: &str = "autograder.toml";

/// Configuration loader that layers several sources.
pub struct ConfigLoader {
    /// Path to a standalone config file.
    config_file: Option<PathBuf>,
    /// Profile to apply instead of reading `AUTOGRADER_PROFILE`.
    profile: Option<String>,
    /// Whether to apply `AUTOGRADER_*` overrides.
    use_env: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    pub fn new() -> Self {
        Self {
            config_file: None,
            profile: None,
            use_env: true,
        }
    }

    /// Set a standalone configuration file path.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Select a profile explicitly.
    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    /// Ignore environment variables entirely.
    pub fn no_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Load configuration from all enabled sources.
    ///
    /// Priority (later sources override earlier):
    /// 1. Default values
    /// 2. Standalone TOML file (`autograder.toml` in the working directory if none was set)
    /// 3. Profile overlay (`[profiles.<name>]`, chosen by `AUTOGRADER_PROFILE`)
    /// 4. Individual env var overrides (`AUTOGRADER_*`)
    pub fn load(self) -> Result<Config> {
        let mut config = Config::default();
        let mut profiles: HashMap<String, serde_json::Value> = HashMap::new();

        let config_file = self.config_file.clone().or_else(|| {
            let default_file = PathBuf::from(DEFAULT_CONFIG_FILE);
            default_file.exists().then_some(default_file)
        });
        if let Some(ref config_path) = config_file {
            let (file_config, file_profiles) = self.load_toml_file(config_path)?;
            config = file_config;
            profiles = file_profiles;
        }

        let profile_name = self.profile.clone().or_else(|| {
            if self.use_env {
                super::env::get_profile_name()
            } else {
                None
            }
        });

        if let Some(profile_name) = profile_name {
            let profile_value = profiles.get(&profile_name).ok_or_else(|| {
                let mut available: Vec<&str> = profiles.keys().map(String::as_str).collect();
                available.sort_unstable();
                if available.is_empty() {
                    Error::config(format!(
                        "profile '{}' not found (no profiles defined)",
                        profile_name,
                    ))
                } else {
                    Error::config(format!(
                        "profile '{}' not found. Available profiles: {}",
                        profile_name,
                        available.join(", "),
                    ))
                }
            })?;

            let mut base_value = serde_json::to_value(&config)
                .map_err(|e| Error::config(format!("failed to serialize config: {}", e)))?;
            deep_merge(&mut base_value, profile_value);
            config = serde_json::from_value(base_value).map_err(|e| {
                Error::config(format!("failed to apply profile '{}': {}", profile_name, e))
            })?;
            tracing::debug!(profile = %profile_name, "applied config profile");
        }

        if self.use_env {
            super::env::apply_env_overrides(&mut config);
        }

        Ok(config)
    }

    /// Load a standalone TOML file, returning the config and its profiles.
    fn load_toml_file(
        &self,
        path: &Path,
    ) -> Result<(Config, HashMap<String, serde_json::Value>)> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;

        let value: serde_json::Value = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse TOML config: {}", e)))?;

        let mut profiles = HashMap::new();
        extract_profiles(&value, &mut profiles);

        let config = serde_json::from_value::<Config>(value)
            .map_err(|e| Error::config(format!("invalid config file: {}", e)))?;
        Ok((config, profiles))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract profile definitions from a parsed config value.
///
/// Profiles live at `value["profiles"]` as `{ name: { ...config fields... } }`.
fn extract_profiles(
    value: &serde_json::Value,
    profiles: &mut HashMap<String, serde_json::Value>,
) {
    if let Some(serde_json::Value::Object(map)) = value.get("profiles") {
        for (name, profile_value) in map {
            profiles.insert(name.clone(), profile_value.clone());
        }
    }
}

/// Recursively deep-merge `overlay` into `base`.
///
/// - Objects: keys are merged recursively (overlay keys win for conflicts).
/// - Scalars and arrays: overlay replaces base entirely.
pub(crate) fn deep_merge(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let entry = base_map
                    .entry(key.clone())
                    .or_insert(serde_json::Value::Null);
                deep_merge(entry, overlay_val);
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Isolation;

    #[test]
    fn test_load_standalone_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("autograder.toml");
        std::fs::write(
            &config_path,
            r#"
[grader]
assignment-name = "Life"

[runner]
isolation = "none"
default-timeout-ms = 750
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .no_env()
            .config_file(&config_path)
            .load()
            .unwrap();

        assert_eq!(config.grader.assignment_name, "Life");
        assert_eq!(config.runner.isolation, Isolation::None);
        assert_eq!(config.runner.default_timeout_ms, 750);
    }

    #[test]
    fn test_load_defaults_without_file() {
        let config = ConfigLoader::new().no_env().load().unwrap();
        assert_eq!(config.runner.default_timeout_ms, 5000);
    }

    #[test]
    fn test_missing_config_file_error() {
        let result = ConfigLoader::new()
            .no_env()
            .config_file("/nonexistent/autograder.toml")
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_toml_error() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        std::fs::write(&config_path, "this is not valid { toml [[[").unwrap();

        let result = ConfigLoader::new()
            .no_env()
            .config_file(&config_path)
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_profile_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("autograder.toml");
        std::fs::write(
            &config_path,
            r#"
[runner]
default-timeout-ms = 5000
poll-interval-ms = 10

[profiles.debug.runner]
catch-exceptions = false
default-timeout-ms = 60000
"#,
        )
        .unwrap();

        let config = ConfigLoader::new()
            .no_env()
            .config_file(&config_path)
            .profile("debug")
            .load()
            .unwrap();
        assert!(!config.runner.catch_exceptions);
        assert_eq!(config.runner.default_timeout_ms, 60000);
        assert_eq!(config.runner.poll_interval_ms, 10);
    }

    #[test]
    fn test_unknown_profile_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("autograder.toml");
        std::fs::write(
            &config_path,
            "[profiles.ci]\nverbose = true\n[profiles.debug]\nverbose = true\n",
        )
        .unwrap();

        let err = ConfigLoader::new()
            .no_env()
            .config_file(&config_path)
            .profile("release")
            .load()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: profile 'release' not found. Available profiles: ci, debug"
        );
    }

    #[test]
    fn test_unknown_profile_without_profiles() {
        let err = ConfigLoader::new()
            .no_env()
            .profile("ci")
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("no profiles defined"));
    }

    #[test]
    fn test_deep_merge_objects() {
        let mut base = serde_json::json!({
            "grader": { "assignment-name": "Life" },
            "runner": { "output-limit": 1000, "poll-interval-ms": 10 }
        });
        let overlay = serde_json::json!({
            "runner": { "output-limit": 50 }
        });
        deep_merge(&mut base, &overlay);
        assert_eq!(base["runner"]["output-limit"], 50);
        assert_eq!(base["runner"]["poll-interval-ms"], 10);
        assert_eq!(base["grader"]["assignment-name"], "Life");
    }

    #[test]
    fn test_deep_merge_array_replaces() {
        let mut base = serde_json::json!({ "selection": { "skip": ["a", "b"] } });
        let overlay = serde_json::json!({ "selection": { "skip": ["c"] } });
        deep_merge(&mut base, &overlay);
        assert_eq!(base["selection"]["skip"], serde_json::json!(["c"]));
    }

    #[test]
    fn test_extract_profiles_none() {
        let value = serde_json::json!({ "grader": {} });
        let mut profiles = HashMap::new();
        extract_profiles(&value, &mut profiles);
        assert!(profiles.is_empty());
    }
}
