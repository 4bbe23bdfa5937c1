use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::money::Money;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Matching parameters, passed explicitly into every search and scoring call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Absolute tolerance in currency units, not a percentage.
    pub amount_tolerance: Money,
    pub standard_window_days: i64,
    pub advance_payment_window_days: i64,
    pub min_accept_score: i32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: Money::from_cents(1),
            standard_window_days: 14,
            advance_payment_window_days: 730,
            min_accept_score: 60,
        }
    }
}

impl MatchConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: MatchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.amount_tolerance.is_negative() {
            return Err(ConfigError::Invalid(
                "amount_tolerance must not be negative".to_string(),
            ));
        }
        if self.standard_window_days < 0 {
            return Err(ConfigError::Invalid(
                "standard_window_days must not be negative".to_string(),
            ));
        }
        if self.advance_payment_window_days < self.standard_window_days {
            return Err(ConfigError::Invalid(format!(
                "advance_payment_window_days ({}) is narrower than standard_window_days ({})",
                self.advance_payment_window_days, self.standard_window_days
            )));
        }
        if self.min_accept_score <= 0 {
            return Err(ConfigError::Invalid(
                "min_accept_score must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
