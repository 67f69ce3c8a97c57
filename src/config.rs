//! Draw policy
//!
//! Loaded from a TOML file, every field falls back to its default

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::generator::{DEFAULT_MAX_ATTEMPTS, Strategy};
use super::validator::Lookback;

/// Rules a round is drawn under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawPolicy {
    /// Recent rounds whose receivers a giver may not draw again
    pub lookback: Lookback,

    /// Candidate permutations tried before giving up (rejection strategy only)
    pub max_attempts: usize,

    /// How the round is searched for
    pub strategy: Strategy,

    /// Leave administrators out of the draw pool
    pub exclude_admins: bool,

    /// Prove a valid round exists before sampling
    pub precheck_feasibility: bool,
}

impl Default for DrawPolicy {
    fn default() -> Self {
        Self {
            lookback: Lookback::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            strategy: Strategy::default(),
            exclude_admins: true,
            precheck_feasibility: false,
        }
    }
}

impl DrawPolicy {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let policy: DrawPolicy = toml::from_str(contents)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategy == Strategy::Rejection && self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1 for the rejection strategy".into(),
            ));
        }
        Ok(())
    }

    pub fn with_lookback(mut self, lookback: Lookback) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let policy = DrawPolicy::from_toml_str("").unwrap();

        assert_eq!(policy, DrawPolicy::default());
        assert_eq!(policy.lookback, Lookback::Years(2));
        assert_eq!(policy.max_attempts, 1000);
        assert!(policy.exclude_admins);
    }

    #[test]
    fn parses_full_policy() {
        let policy = DrawPolicy::from_toml_str(
            r#"
            lookback = "all"
            max_attempts = 100
            strategy = "matching"
            exclude_admins = false
            precheck_feasibility = true
            "#,
        )
        .unwrap();

        assert_eq!(policy.lookback, Lookback::All);
        assert_eq!(policy.max_attempts, 100);
        assert_eq!(policy.strategy, Strategy::Matching);
        assert!(!policy.exclude_admins);
        assert!(policy.precheck_feasibility);
    }

    #[test]
    fn parses_year_window() {
        let policy = DrawPolicy::from_toml_str("lookback = { years = 3 }").unwrap();

        assert_eq!(policy.lookback, Lookback::Years(3));
    }

    #[test]
    fn rejects_zero_attempts() {
        let err = DrawPolicy::from_toml_str("max_attempts = 0").unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(&path, "max_attempts = 250\n").unwrap();

        let policy = DrawPolicy::load(&path).unwrap();
        assert_eq!(policy.max_attempts, 250);
    }
}
