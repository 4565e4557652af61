use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::AuthzError;
use crate::rbac::DEFAULT_MAX_HIERARCHY_LEVEL;

/// Behaviour switches of an [`Enforcer`](crate::enforcer::Enforcer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcerSettings {
    /// When false every request is allowed without evaluation.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Push each policy mutation to the adapter.
    #[serde(default = "default_true")]
    pub auto_save: bool,
    /// Keep the role graphs in step with grouping rule mutations.
    #[serde(default = "default_true")]
    pub auto_build_role_links: bool,
    #[serde(default = "default_true")]
    pub auto_notify_watcher: bool,
    /// Request values that parse as JSON objects become attribute maps.
    #[serde(default)]
    pub accept_json_request: bool,
    #[serde(default = "default_max_hierarchy_level")]
    pub max_hierarchy_level: usize,
    /// Lifetime of cached decisions; `None` keeps them until invalidated.
    pub cache_ttl_secs: Option<u64>,
    pub model_path: Option<PathBuf>,
    /// A KDL policy file, or a directory of them.
    pub policy_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_max_hierarchy_level() -> usize {
    DEFAULT_MAX_HIERARCHY_LEVEL
}

impl Default for EnforcerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_save: true,
            auto_build_role_links: true,
            auto_notify_watcher: true,
            accept_json_request: false,
            max_hierarchy_level: DEFAULT_MAX_HIERARCHY_LEVEL,
            cache_ttl_secs: None,
            model_path: None,
            policy_path: None,
        }
    }
}

impl EnforcerSettings {
    pub fn load(path: &str) -> Result<Self, AuthzError> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("enabled", defaults.enabled)?
            .set_default("auto_save", defaults.auto_save)?
            .set_default("auto_build_role_links", defaults.auto_build_role_links)?
            .set_default("auto_notify_watcher", defaults.auto_notify_watcher)?
            .set_default("accept_json_request", defaults.accept_json_request)?
            .set_default("max_hierarchy_level", defaults.max_hierarchy_level as u64)?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: CASTELLAN__MAX_HIERARCHY_LEVEL=5, etc.
        builder = builder.add_source(config::Environment::with_prefix("CASTELLAN").separator("__"));

        let cfg = builder.build()?;
        let mut s: EnforcerSettings = cfg.try_deserialize()?;

        if let Some(model_path) = &s.model_path {
            if model_path.is_relative() {
                s.model_path = Some(std::env::current_dir()?.join(model_path));
            }
        }
        if let Some(policy_path) = &s.policy_path {
            if policy_path.is_relative() {
                s.policy_path = Some(std::env::current_dir()?.join(policy_path));
            }
        }

        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings = EnforcerSettings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(settings.enabled);
        assert!(settings.auto_save);
        assert!(settings.auto_build_role_links);
        assert!(!settings.accept_json_request);
        assert_eq!(settings.max_hierarchy_level, 10);
        assert_eq!(settings.cache_ttl_secs, None);
        assert!(settings.model_path.is_none());
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("castellan.toml");

        let config_content = r#"
auto_save = false
accept_json_request = true
max_hierarchy_level = 3
cache_ttl_secs = 30
model_path = "/etc/castellan/model.conf"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = EnforcerSettings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(!settings.auto_save);
        assert!(settings.accept_json_request);
        assert_eq!(settings.max_hierarchy_level, 3);
        assert_eq!(settings.cache_ttl_secs, Some(30));
        assert_eq!(
            settings.model_path,
            Some(PathBuf::from("/etc/castellan/model.conf"))
        );
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("castellan.toml");

        fs::write(&config_path, "auto_notify_watcher = true\n").expect("Failed to write config");

        env::set_var("CASTELLAN__AUTO_NOTIFY_WATCHER", "false");

        let settings = EnforcerSettings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(!settings.auto_notify_watcher);

        env::remove_var("CASTELLAN__AUTO_NOTIFY_WATCHER");
    }

    #[test]
    fn test_settings_path_normalization() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("castellan.toml");

        fs::write(&config_path, "policy_path = \"relative/policy.kdl\"\n")
            .expect("Failed to write config");

        let settings = EnforcerSettings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        let policy_path = settings.policy_path.expect("policy path set");
        assert!(policy_path.is_absolute());
        assert!(policy_path.ends_with("relative/policy.kdl"));
    }
}
