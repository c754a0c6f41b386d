//! Configuration for the reputation ledger
//!
//! Settings are read from a YAML file and can be overridden through
//! `REPLEDGER_*` environment variables.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable naming the YAML configuration file
pub const CONFIG_FILE_ENV: &str = "REPLEDGER_CONFIG_FILE";

/// Errors that can occur in configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    
    #[error("Failed to read file: {0}")]
    FileReadError(String),
    
    #[error("Failed to parse YAML: {0}")]
    YamlParseError(#[from] serde_yaml::Error),
    
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Automatic banning of users whose reputation drops too low
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBanConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Users are banned once their reputation is strictly below this value
    #[serde(default)]
    pub threshold: i64,
}

impl Default for AutoBanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0,
        }
    }
}

/// One step of the upvote weight table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTier {
    pub min_reputation: i64,
    pub weight: i64,
}

/// How much reputation an upvote grants, by voter reputation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default = "default_weight")]
    pub default_weight: i64,
    #[serde(default)]
    pub tiers: Vec<WeightTier>,
}

fn default_weight() -> i64 {
    1
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            default_weight: default_weight(),
            tiers: Vec::new(),
        }
    }
}

/// Behaviour of the vote ledger itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Follow the caller's claimed prior vote state instead of the audit log
    #[serde(default = "default_trust_caller_state")]
    pub trust_caller_state: bool,
    /// Capacity of the queue feeding the ban worker
    #[serde(default = "default_ban_queue_capacity")]
    pub ban_queue_capacity: usize,
}

fn default_trust_caller_state() -> bool {
    true
}

fn default_ban_queue_capacity() -> usize {
    64
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            trust_caller_state: default_trust_caller_state(),
            ban_queue_capacity: default_ban_queue_capacity(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub auto_ban: AutoBanConfig,
    #[serde(default)]
    pub weight: WeightConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            auto_ban: AutoBanConfig::default(),
            weight: WeightConfig::default(),
            ledger: LedgerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl RulesConfig {
    /// Load configuration from the environment.
    ///
    /// Starts from the file named by `REPLEDGER_CONFIG_FILE` when it exists,
    /// otherwise from defaults, then applies variable overrides.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }
    
    /// Same as [`RulesConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_ENV) {
            Some(path) if Path::new(&path).exists() => Self::from_file(&path)?,
            Some(path) => {
                debug!("Config file {} not found, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };
        
        if let Some(enabled) = parse_var::<bool, _>(&lookup, "REPLEDGER_AUTOBAN_ENABLED")? {
            config.auto_ban.enabled = enabled;
        }
        if let Some(threshold) = parse_var::<i64, _>(&lookup, "REPLEDGER_AUTOBAN_THRESHOLD")? {
            config.auto_ban.threshold = threshold;
        }
        if let Some(weight) = parse_var::<i64, _>(&lookup, "REPLEDGER_DEFAULT_WEIGHT")? {
            config.weight.default_weight = weight;
        }
        if let Some(trust) = parse_var::<bool, _>(&lookup, "REPLEDGER_TRUST_CALLER_STATE")? {
            config.ledger.trust_caller_state = trust;
        }
        if let Some(level) = lookup("REPLEDGER_LOG_LEVEL") {
            config.log_level = level;
        }
        
        config.validate()?;
        Ok(config)
    }
    
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("Failed to read {}: {}", path.display(), e)))?;
        
        let config = Self::from_yaml(&contents)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
    
    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: RulesConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
    
    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.weight.default_weight < 0 {
            return Err(ConfigError::Invalid("default_weight cannot be negative".to_string()));
        }
        
        let mut seen = Vec::with_capacity(self.weight.tiers.len());
        for tier in &self.weight.tiers {
            if tier.weight < 0 {
                return Err(ConfigError::Invalid(format!(
                    "weight for tier {} cannot be negative",
                    tier.min_reputation
                )));
            }
            if seen.contains(&tier.min_reputation) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate weight tier at reputation {}",
                    tier.min_reputation
                )));
            }
            seen.push(tier.min_reputation);
        }
        
        if self.ledger.ban_queue_capacity == 0 {
            return Err(ConfigError::Invalid("ban_queue_capacity must be positive".to_string()));
        }
        
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    
    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }
    
    #[test]
    fn test_default_config() {
        let config = RulesConfig::from_lookup(lookup_from(&[])).unwrap();
        assert!(!config.auto_ban.enabled);
        assert_eq!(config.auto_ban.threshold, 0);
        assert_eq!(config.weight.default_weight, 1);
        assert!(config.weight.tiers.is_empty());
        assert!(config.ledger.trust_caller_state);
        assert_eq!(config.ledger.ban_queue_capacity, 64);
        assert_eq!(config.log_level, "info");
    }
    
    #[test]
    fn test_env_overrides() {
        let config = RulesConfig::from_lookup(lookup_from(&[
            ("REPLEDGER_AUTOBAN_ENABLED", "true"),
            ("REPLEDGER_AUTOBAN_THRESHOLD", "-10"),
            ("REPLEDGER_TRUST_CALLER_STATE", "false"),
            ("REPLEDGER_LOG_LEVEL", "debug"),
        ])).unwrap();
        
        assert!(config.auto_ban.enabled);
        assert_eq!(config.auto_ban.threshold, -10);
        assert!(!config.ledger.trust_caller_state);
        assert_eq!(config.log_level, "debug");
    }
    
    #[test]
    fn test_invalid_env_value() {
        let err = RulesConfig::from_lookup(lookup_from(&[
            ("REPLEDGER_AUTOBAN_THRESHOLD", "low"),
        ])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(ref key, _) if key == "REPLEDGER_AUTOBAN_THRESHOLD"));
    }
    
    #[test]
    fn test_yaml_file_then_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "auto_ban:\n  enabled: true\n  threshold: 5\nweight:\n  default_weight: 1\n  tiers:\n    - {{ min_reputation: 10, weight: 5 }}\n    - {{ min_reputation: 100, weight: 10 }}").unwrap();
        let path = file.path().to_string_lossy().into_owned();
        
        let config = RulesConfig::from_lookup(lookup_from(&[
            (CONFIG_FILE_ENV, path.as_str()),
            ("REPLEDGER_AUTOBAN_THRESHOLD", "0"),
        ])).unwrap();
        
        assert!(config.auto_ban.enabled);
        assert_eq!(config.auto_ban.threshold, 0);
        assert_eq!(config.weight.tiers.len(), 2);
        assert_eq!(config.weight.tiers[0], WeightTier { min_reputation: 10, weight: 5 });
        assert!(config.ledger.trust_caller_state);
    }
    
    #[test]
    fn test_validation_rejects_bad_tables() {
        let duplicate = "weight:\n  tiers:\n    - { min_reputation: 10, weight: 5 }\n    - { min_reputation: 10, weight: 6 }\n";
        assert!(matches!(RulesConfig::from_yaml(duplicate), Err(ConfigError::Invalid(_))));
        
        let negative = "weight:\n  default_weight: -1\n";
        assert!(matches!(RulesConfig::from_yaml(negative), Err(ConfigError::Invalid(_))));
        
        let queue = "ledger:\n  ban_queue_capacity: 0\n";
        assert!(matches!(RulesConfig::from_yaml(queue), Err(ConfigError::Invalid(_))));
    }
}
