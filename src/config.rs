use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::matching::JrtPolicy;
use crate::tooling::TargetSystem;

const ENV_PREFIX: &str = "JWEAVE_";

/// Agent settings. Read from an optional JSON file, then overridden by `JWEAVE_*`
/// environment variables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub enabled_systems: Vec<TargetSystem>,
    pub integrations_enabled: bool,
    /// Per-integration switches keyed by module name or alias.
    pub integrations: HashMap<String, bool>,
    pub coverage_includes: Vec<String>,
    pub coverage_excludes: Vec<String>,
    /// Classes never instrumented, `com.example.Secret` or `com.example.generated.*`.
    pub excludes: Vec<String>,
    /// `host:port` of the coordinator keeping class matching results.
    pub signal_server: Option<String>,
    pub type_cache_capacity: usize,
    pub jrt_policy: JrtPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled_systems: vec![TargetSystem::Tracing],
            integrations_enabled: true,
            integrations: HashMap::new(),
            coverage_includes: Vec::new(),
            coverage_excludes: Vec::new(),
            excludes: Vec::new(),
            signal_server: None,
            type_cache_capacity: 512,
            jrt_policy: JrtPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Loads `path` when given, then applies the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn apply_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(setting) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match setting {
                "ENABLED_SYSTEMS" => {
                    self.enabled_systems = split_list(&value)
                        .filter_map(|system| match system.parse() {
                            Ok(system) => Some(system),
                            Err(error) => {
                                warn!(%error, "ignoring target system");
                                None
                            }
                        })
                        .collect();
                }
                "INTEGRATIONS_ENABLED" => {
                    if let Some(enabled) = parse_bool(&key, &value) {
                        self.integrations_enabled = enabled;
                    }
                }
                "COVERAGE_INCLUDES" => self.coverage_includes = split_list(&value).collect(),
                "COVERAGE_EXCLUDES" => self.coverage_excludes = split_list(&value).collect(),
                "EXCLUDES" => self.excludes = split_list(&value).collect(),
                "SIGNAL_SERVER" => {
                    self.signal_server = Some(value.trim().to_string()).filter(|s| !s.is_empty());
                }
                "TYPE_CACHE_CAPACITY" => match value.trim().parse() {
                    Ok(capacity) => self.type_cache_capacity = capacity,
                    Err(_) => warn!(key = %key, value = %value, "ignoring invalid capacity"),
                },
                _ => {
                    let name = setting
                        .strip_prefix("INTEGRATION_")
                        .and_then(|rest| rest.strip_suffix("_ENABLED"));
                    if let Some(name) = name {
                        if let Some(enabled) = parse_bool(&key, &value) {
                            self.integrations.insert(normalize_name(name), enabled);
                        }
                    }
                }
            }
        }
    }

    pub fn is_system_enabled(&self, system: TargetSystem) -> bool {
        system == TargetSystem::Common || self.enabled_systems.contains(&system)
    }

    /// A module enabled by default stays enabled unless one of its names is switched off. A
    /// module disabled by default needs one of its names switched on.
    pub fn is_integration_enabled(&self, names: &[String], default_enabled: bool) -> bool {
        let default_enabled = default_enabled && self.integrations_enabled;
        let setting = |name: &String| {
            let name = normalize_name(name);
            self.integrations
                .iter()
                .find(|(key, _)| normalize_name(key) == name)
                .map(|(_, enabled)| *enabled)
        };
        if default_enabled {
            names.iter().all(|name| setting(name).unwrap_or(true))
        } else {
            names.iter().any(|name| setting(name) == Some(true))
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

fn parse_bool(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => {
            warn!(key, value, "ignoring invalid boolean");
            None
        }
    }
}

/// `okhttp-3`, `okhttp.3` and `OKHTTP_3` name the same integration.
fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Vec<(String, String)> {
        vars.iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jweave.json");
        fs::write(
            &path,
            r#"{"coverageIncludes": ["com.example"], "typeCacheCapacity": 64,
                "jrtPolicy": "cache"}"#,
        )
        .expect("write config");

        let mut config = AgentConfig::from_file(&path).expect("load");
        assert_eq!(config.type_cache_capacity, 64);
        assert_eq!(config.jrt_policy, JrtPolicy::Cache);
        assert!(config.integrations_enabled);

        config.apply_env(env(&[
            ("JWEAVE_ENABLED_SYSTEMS", "tracing, iast"),
            ("JWEAVE_COVERAGE_EXCLUDES", "com.example.generated,"),
            ("JWEAVE_SIGNAL_SERVER", "127.0.0.1:4000"),
            ("JWEAVE_EXCLUDES", "com.example.Secret, com.example.generated.*"),
            ("JWEAVE_TYPE_CACHE_CAPACITY", "not a number"),
            ("OTHER_VAR", "ignored"),
        ]));

        assert_eq!(
            config.enabled_systems,
            vec![TargetSystem::Tracing, TargetSystem::Iast]
        );
        assert_eq!(config.coverage_includes, vec!["com.example"]);
        assert_eq!(config.coverage_excludes, vec!["com.example.generated"]);
        assert_eq!(config.signal_server.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(
            config.excludes,
            vec!["com.example.Secret", "com.example.generated.*"]
        );
        assert_eq!(config.type_cache_capacity, 64);
        assert!(config.is_system_enabled(TargetSystem::Common));
        assert!(!config.is_system_enabled(TargetSystem::Profiling));
    }

    #[test]
    fn integration_switches_follow_names_and_aliases() {
        let mut config = AgentConfig::default();
        config.apply_env(env(&[
            ("JWEAVE_INTEGRATION_OKHTTP_3_ENABLED", "false"),
            ("JWEAVE_INTEGRATION_EXPERIMENTAL_ENABLED", "true"),
        ]));

        assert!(!config.is_integration_enabled(&names(&["okhttp", "okhttp-3"]), true));
        assert!(config.is_integration_enabled(&names(&["jdbc"]), true));
        assert!(config.is_integration_enabled(&names(&["experimental", "exp"]), false));
        assert!(!config.is_integration_enabled(&names(&["other"]), false));

        config.integrations_enabled = false;
        assert!(!config.is_integration_enabled(&names(&["jdbc"]), true));
        assert!(config.is_integration_enabled(&names(&["experimental"]), true));
    }
}
