//! Analysis configuration.
//!
//! Every setting has a default, so an empty or partial TOML file is valid.
//! Command-line flags are applied on top of the loaded file by the binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::sampler::nuts::NutsConfig;

/// Names of the predictor columns and where the outcome columns start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    /// Age at testing.
    pub age: String,
    pub sex: String,
    /// Years of education.
    pub education: String,
    /// Two-valued diagnostic group label.
    pub group: String,
    /// 0-based position of the first outcome column; every later column is an outcome too.
    pub first_outcome_index: usize,
    /// Group label encoded as 1.
    pub group_positive: String,
    /// Group label encoded as 0.
    pub group_negative: String,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            age: "age".to_string(),
            sex: "sex".to_string(),
            education: "education".to_string(),
            group: "group".to_string(),
            first_outcome_index: 6,
            group_positive: "nappa".to_string(),
            group_negative: "dpa".to_string(),
        }
    }
}

impl ColumnSchema {
    pub fn required_columns(&self) -> [&str; 4] {
        [
            self.age.as_str(),
            self.sex.as_str(),
            self.education.as_str(),
            self.group.as_str(),
        ]
    }
}

/// Prior scales of the regression model. All priors are centred on zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Standard deviation of the Normal prior on each slope.
    pub slope_sd: f64,
    /// Standard deviation of the Normal prior on the intercept.
    pub intercept_sd: f64,
    /// Scale of the half-Normal prior on the noise standard deviation.
    pub sigma_sd: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            slope_sd: 5.0,
            intercept_sd: 10.0,
            sigma_sd: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Probability mass of the highest-density interval.
    pub hdi_prob: f64,
    /// Render trace and posterior figures in the terminal.
    pub plots: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            hdi_prob: 0.95,
            plots: true,
        }
    }
}

/// Top-level configuration, mirroring the layout of the TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub columns: ColumnSchema,
    pub priors: PriorConfig,
    pub sampler: NutsConfig,
    pub report: ReportConfig,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&text)?;
        Ok(config)
    }

    /// Rejects settings that would make the analysis meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be a positive finite number, got {value}"),
                })
            }
        };
        positive("priors.slope_sd", self.priors.slope_sd)?;
        positive("priors.intercept_sd", self.priors.intercept_sd)?;
        positive("priors.sigma_sd", self.priors.sigma_sd)?;

        if !(self.report.hdi_prob > 0.0 && self.report.hdi_prob < 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "report.hdi_prob",
                reason: format!("must lie strictly between 0 and 1, got {}", self.report.hdi_prob),
            });
        }

        if self.columns.group_positive == self.columns.group_negative {
            return Err(ConfigError::InvalidValue {
                field: "columns.group_positive",
                reason: "the two group labels must differ".to_string(),
            });
        }

        self.sampler
            .validate()
            .map_err(|reason| ConfigError::InvalidValue {
                field: "sampler",
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_yields_defaults() {
        let config: AnalysisConfig = toml::from_str("").unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.sampler.n_samples, 2000);
        assert_eq!(config.sampler.n_warmup, 1000);
        assert_eq!(config.columns.first_outcome_index, 6);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[columns]\nage = \"age_at_test\"\ngroup_positive = \"svppa\"\n\n[sampler]\nn_chains = 2\n"
        )
        .unwrap();
        file.flush().unwrap();

        let config = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(config.columns.age, "age_at_test");
        assert_eq!(config.columns.sex, "sex");
        assert_eq!(config.columns.group_positive, "svppa");
        assert_eq!(config.sampler.n_chains, 2);
        assert_eq!(config.sampler.n_samples, 2000);
        assert_eq!(config.priors, PriorConfig::default());
    }

    #[test]
    fn rejects_non_positive_prior_scale() {
        let mut config = AnalysisConfig::default();
        config.priors.sigma_sd = 0.0;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "priors.sigma_sd"),
            other => panic!("expected invalid sigma_sd, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_hdi() {
        let mut config = AnalysisConfig::default();
        config.report.hdi_prob = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_identical_group_labels() {
        let mut config = AnalysisConfig::default();
        config.columns.group_negative = config.columns.group_positive.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[sampler\nn_chains = 2").unwrap();
        file.flush().unwrap();
        match AnalysisConfig::load(file.path()) {
            Err(ConfigError::TomlParseError(_)) => {}
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
