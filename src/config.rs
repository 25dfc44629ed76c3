//! Stackwire Configuration Module
//!
//! Two concerns live here:
//!
//! - [`StackConfig`]: the named options a stack program reads (`teamName`,
//!   `createEntraResources`, `azure-native:subscriptionId`, ...)
//! - [`EngineSettings`]: how the engine materializes (concurrency, timeouts)
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI assignments (`-c key=value`)
//! 2. Environment variables (`STACKWIRE_CONFIG_<key>`, `__` for `:`)
//! 3. Config file (`[config]` and `[engine]` tables, TOML)
//! 4. Program defaults

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StackError};

/// Environment prefix for configuration options
pub const ENV_PREFIX: &str = "STACKWIRE_CONFIG_";

/// A single option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl ConfigValue {
    /// Type a raw string (env vars, CLI assignments)
    ///
    /// A number is only inferred when it renders back to exactly `raw`, so
    /// identifiers like `0042` or 20-digit account ids stay strings.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() && Self::Number(n).to_string() == raw => Self::Number(n),
                _ => Self::String(raw.to_string()),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                Value::from(*n as i64)
            }
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                write!(f, "{}", *n as i64)
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Named options supplied to one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder-style `set`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Set only if absent (program defaults)
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Overlay `other` on top of this config
    pub fn merge(&mut self, other: StackConfig) {
        self.values.extend(other.values);
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Option rendered as a string, if set
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(ToString::to_string)
    }

    /// Option rendered as a string; `MissingConfiguration` if unset
    pub fn require(&self, key: &str) -> Result<String> {
        self.get_str(key)
            .ok_or_else(|| StackError::MissingConfiguration {
                keys: vec![key.to_string()],
            })
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    /// Boolean option; strings "true"/"false" are accepted
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(b)) => Ok(Some(*b)),
            Some(ConfigValue::String(s)) if s == "true" => Ok(Some(true)),
            Some(ConfigValue::String(s)) if s == "false" => Ok(Some(false)),
            Some(other) => Err(StackError::InvalidConfiguration {
                key: key.to_string(),
                expected: "a bool".to_string(),
                actual: format!("{} ({})", other, other.type_name()),
            }),
        }
    }

    pub fn get_number(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(ConfigValue::Number(n)) => Ok(Some(*n)),
            Some(other) => Err(StackError::InvalidConfiguration {
                key: key.to_string(),
                expected: "a number".to_string(),
                actual: format!("{} ({})", other, other.type_name()),
            }),
        }
    }

    /// Scoped view: `namespace("azure-native").require("subscriptionId")`
    /// reads `azure-native:subscriptionId`
    pub fn namespace<'a>(&'a self, namespace: &str) -> ConfigNamespace<'a> {
        ConfigNamespace {
            config: self,
            prefix: format!("{namespace}:"),
        }
    }

    /// Fail with every missing key at once, before any node is built
    pub fn validate_required<I, S>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let missing: Vec<String> = keys
            .into_iter()
            .filter(|k| !self.contains(k.as_ref()))
            .map(|k| k.as_ref().to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StackError::MissingConfiguration { keys: missing })
        }
    }

    /// Options from `STACKWIRE_CONFIG_*` environment variables
    pub fn from_env() -> Self {
        Self::from_env_vars(std::env::vars())
    }

    /// Options from an explicit variable list (testable without touching the process env)
    pub fn from_env_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = Self::new();
        for (name, raw) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                if !key.is_empty() {
                    config.set(key.replace("__", ":"), ConfigValue::parse(&raw));
                }
            }
        }
        config
    }

    /// Parse a CLI assignment `key=value`
    pub fn parse_assignment(raw: &str) -> Result<(String, ConfigValue)> {
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), ConfigValue::parse(value)))
            }
            _ => Err(StackError::ConfigError {
                reason: format!("expected key=value, got '{raw}'"),
            }),
        }
    }
}

/// Namespaced view over a [`StackConfig`]
pub struct ConfigNamespace<'a> {
    config: &'a StackConfig,
    prefix: String,
}

impl ConfigNamespace<'_> {
    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.config.get_str(&self.key(key))
    }

    pub fn require(&self, key: &str) -> Result<String> {
        self.config.require(&self.key(key))
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.config.get_bool(&self.key(key))
    }
}

/// Materialization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum concurrent provider invocations
    pub max_concurrency: usize,
    /// Per-invocation timeout unless the provider declares its own
    pub provider_timeout_secs: u64,
    /// Cancel the run when any node fails
    pub fail_fast: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            provider_timeout_secs: 300, // 5 minutes
            fail_fast: false,
        }
    }
}

impl EngineSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Reject settings that would stall or instantly time out every node
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("engine.max_concurrency", self.max_concurrency as u64),
            ("engine.provider_timeout_secs", self.provider_timeout_secs),
        ];
        match positive.iter().find(|(_, value)| *value == 0) {
            Some((key, _)) => Err(StackError::InvalidConfiguration {
                key: key.to_string(),
                expected: "a value of at least 1".to_string(),
                actual: "0".to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// On-disk configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub config: StackConfig,

    #[serde(default)]
    pub engine: EngineSettings,
}

impl ConfigFile {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| StackError::ConfigError {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content).map_err(|e| StackError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })?;
        file.engine.validate()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn require_and_defaults() {
        let config = StackConfig::new().with("teamName", "data-eng");

        assert_eq!(config.require("teamName").unwrap(), "data-eng");
        assert_eq!(config.get_or("environment", "dev"), "dev");

        let err = config.require("spokeCidr").unwrap_err();
        assert_eq!(
            err,
            StackError::MissingConfiguration {
                keys: vec!["spokeCidr".into()]
            }
        );
    }

    #[test]
    fn validate_required_reports_all_missing_keys() {
        let config = StackConfig::new().with("teamName", "data-eng");
        let err = config
            .validate_required(["teamName", "spokeCidr", "azure-native:subscriptionId"])
            .unwrap_err();

        match err {
            StackError::MissingConfiguration { keys } => {
                assert_eq!(keys, vec!["spokeCidr", "azure-native:subscriptionId"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn typed_getters() {
        let config = StackConfig::new()
            .with("createEntraResources", true)
            .with("legacyFlag", "false")
            .with("replicas", 3.0)
            .with("teamName", "data-eng");

        assert_eq!(config.get_bool("createEntraResources").unwrap(), Some(true));
        assert_eq!(config.get_bool("legacyFlag").unwrap(), Some(false));
        assert_eq!(config.get_bool("missing").unwrap(), None);
        assert!(config.get_bool("teamName").is_err());
        assert_eq!(config.get_number("replicas").unwrap(), Some(3.0));
        assert_eq!(config.get_str("replicas").unwrap(), "3");
    }

    #[test]
    fn namespaced_view() {
        let config = StackConfig::new().with("azure-native:subscriptionId", "sub-123");
        let azure = config.namespace("azure-native");

        assert_eq!(azure.require("subscriptionId").unwrap(), "sub-123");
        assert!(azure.get_str("location").is_none());
    }

    #[test]
    fn env_vars_are_typed_and_namespaced() {
        let config = StackConfig::from_env_vars(vec![
            ("STACKWIRE_CONFIG_teamName".to_string(), "data-eng".to_string()),
            ("STACKWIRE_CONFIG_createEntraResources".to_string(), "true".to_string()),
            ("STACKWIRE_CONFIG_azure-native__subscriptionId".to_string(), "sub".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ]);

        assert_eq!(config.len(), 3);
        assert_eq!(config.get_bool("createEntraResources").unwrap(), Some(true));
        assert_eq!(config.require("azure-native:subscriptionId").unwrap(), "sub");
    }

    #[test]
    fn parse_assignment() {
        let (key, value) = StackConfig::parse_assignment("spokeCidr=10.1.0.0/16").unwrap();
        assert_eq!(key, "spokeCidr");
        assert_eq!(value, ConfigValue::String("10.1.0.0/16".into()));

        assert!(StackConfig::parse_assignment("novalue").is_err());
        assert!(StackConfig::parse_assignment("=x").is_err());
    }

    #[test]
    fn config_file_roundtrip_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[config]
teamName = "data-eng"
createEntraResources = true
replicas = 2

[engine]
max_concurrency = 4
fail_fast = true
"#
        )
        .unwrap();

        let loaded = ConfigFile::load(file.path()).unwrap();
        assert_eq!(loaded.config.require("teamName").unwrap(), "data-eng");
        assert_eq!(loaded.config.get_bool("createEntraResources").unwrap(), Some(true));
        assert_eq!(loaded.config.get_number("replicas").unwrap(), Some(2.0));
        assert_eq!(loaded.engine.max_concurrency, 4);
        assert!(loaded.engine.fail_fast);
        assert_eq!(loaded.engine.provider_timeout_secs, 300);
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        assert!(matches!(
            ConfigFile::parse("[config\nteamName ="),
            Err(StackError::ConfigError { .. })
        ));
    }

    #[test]
    fn zero_engine_limits_are_rejected() {
        let err = ConfigFile::parse("[engine]\nprovider_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(
            err,
            StackError::InvalidConfiguration { ref key, .. } if key == "engine.provider_timeout_secs"
        ));

        let err = ConfigFile::parse("[engine]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(
            err,
            StackError::InvalidConfiguration { ref key, .. } if key == "engine.max_concurrency"
        ));

        assert!(ConfigFile::parse("[engine]\nmax_concurrency = 1\n").is_ok());
    }

    #[test]
    fn identifiers_keep_their_exact_text() {
        let (_, cost_center) = StackConfig::parse_assignment("costCenter=0042").unwrap();
        assert_eq!(cost_center, ConfigValue::String("0042".into()));

        let (_, account) = StackConfig::parse_assignment("accountId=12345678901234567890").unwrap();
        assert_eq!(account.to_json(), serde_json::json!("12345678901234567890"));

        let config = StackConfig::from_env_vars(vec![
            ("STACKWIRE_CONFIG_costCenter".to_string(), "0042".to_string()),
            ("STACKWIRE_CONFIG_version".to_string(), "1e3".to_string()),
        ]);
        assert_eq!(config.require("costCenter").unwrap(), "0042");
        assert_eq!(config.require("version").unwrap(), "1e3");
    }

    #[test]
    fn canonical_numbers_are_still_typed() {
        assert_eq!(ConfigValue::parse("3"), ConfigValue::Number(3.0));
        assert_eq!(ConfigValue::parse("-2"), ConfigValue::Number(-2.0));
        assert_eq!(ConfigValue::parse("1.5"), ConfigValue::Number(1.5));
        assert_eq!(ConfigValue::parse("3.0"), ConfigValue::String("3.0".into()));
    }

    #[test]
    fn config_value_to_json() {
        assert_eq!(ConfigValue::Number(3.0).to_json(), serde_json::json!(3));
        assert_eq!(ConfigValue::Number(1.5).to_json(), serde_json::json!(1.5));
        assert_eq!(ConfigValue::parse("yes").to_json(), serde_json::json!("yes"));
    }
}
