//! Process-wide configuration for the runner.
//!
//! Configuration is read from a YAML file (or defaults) and then
//! overridden from environment variables. It is loaded once by the binary
//! before a runner is built; the runner only reads from it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding `runner.nb_procs`.
pub const ENV_NB_PROCS: &str = "NARPS_NB_PROCS";
/// Environment variable overriding `directories.dataset`.
pub const ENV_DATASET_DIR: &str = "NARPS_DATASET_DIR";
/// Environment variable overriding `directories.reproduced_results`.
pub const ENV_RESULTS_DIR: &str = "NARPS_RESULTS_DIR";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Execution settings.
    pub runner: RunnerSection,
    /// Directory roots.
    pub directories: DirectoriesSection,
    /// Participant selection settings.
    pub participants: ParticipantsSection,
}

/// `runner` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Number of parallel workers used when dispatching workflows.
    pub nb_procs: usize,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self { nb_procs: 1 }
    }
}

/// `directories` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoriesSection {
    /// Root of the BIDS dataset (contains `participants.tsv`).
    pub dataset: PathBuf,
    /// Root under which reproduced results are written.
    pub reproduced_results: PathBuf,
}

impl Default for DirectoriesSection {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("data/original/ds001734"),
            reproduced_results: PathBuf::from("data/results/reproduced"),
        }
    }
}

/// `participants` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantsSection {
    /// Subjects excluded from analysis, per team key.
    pub exclusions: BTreeMap<String, Vec<String>>,
}

impl Configuration {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a YAML file.
    ///
    /// Missing sections and keys take their default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parses a configuration from a YAML string.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Creates configuration from defaults and environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NARPS_NB_PROCS`: Number of parallel workers (default: 1)
    /// - `NARPS_DATASET_DIR`: Dataset root directory
    /// - `NARPS_RESULTS_DIR`: Reproduced results root directory
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file if given (defaults otherwise), applies
    /// environment overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_NB_PROCS) {
            self.runner.nb_procs = parse_env_value(&val, ENV_NB_PROCS)?;
        }

        if let Some(val) = lookup(ENV_DATASET_DIR) {
            self.directories.dataset = PathBuf::from(val);
        }

        if let Some(val) = lookup(ENV_RESULTS_DIR) {
            self.directories.reproduced_results = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.nb_procs == 0 {
            return Err(ConfigError::ValidationFailed(
                "runner.nb_procs must be greater than 0".to_string(),
            ));
        }

        if self.directories.dataset.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "directories.dataset cannot be empty".to_string(),
            ));
        }

        if self.directories.reproduced_results.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "directories.reproduced_results cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the number of parallel workers.
    pub fn with_nb_procs(mut self, nb_procs: usize) -> Self {
        self.runner.nb_procs = nb_procs;
        self
    }

    /// Builder method to set the dataset directory.
    pub fn with_dataset_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.directories.dataset = path.into();
        self
    }

    /// Builder method to set the reproduced results directory.
    pub fn with_results_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.directories.reproduced_results = path.into();
        self
    }

    /// Builder method to exclude subjects for a team.
    pub fn with_exclusions(mut self, team: impl Into<String>, subjects: Vec<String>) -> Self {
        self.participants.exclusions.insert(team.into(), subjects);
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Configuration::default();
        assert_eq!(config.runner.nb_procs, 1);
        assert_eq!(
            config.directories.dataset,
            PathBuf::from("data/original/ds001734")
        );
        assert!(config.participants.exclusions.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
runner:
  nb_procs: 8
directories:
  dataset: /data/ds001734
  reproduced_results: /results
participants:
  exclusions:
    2T6S: ["016", "030"]
"#;
        let config = Configuration::from_yaml(yaml).expect("should parse");
        assert_eq!(config.runner.nb_procs, 8);
        assert_eq!(config.directories.dataset, PathBuf::from("/data/ds001734"));
        assert_eq!(config.directories.reproduced_results, PathBuf::from("/results"));
        assert_eq!(config.participants.exclusions["2T6S"], vec!["016", "030"]);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Configuration::from_yaml("runner:\n  nb_procs: 3\n").expect("should parse");
        assert_eq!(config.runner.nb_procs, 3);
        assert_eq!(
            config.directories.reproduced_results,
            PathBuf::from("data/results/reproduced")
        );

        let empty = Configuration::from_yaml("").expect("empty file is allowed");
        assert_eq!(empty.runner.nb_procs, 1);
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "runner:\n  nb_procs: 2\n").expect("write config");

        let config = Configuration::from_file(&path).expect("should load");
        assert_eq!(config.runner.nb_procs, 2);

        let missing = Configuration::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_NB_PROCS, "6"),
            (ENV_DATASET_DIR, "/mnt/ds"),
            (ENV_RESULTS_DIR, "/mnt/results"),
        ]
        .into_iter()
        .collect();

        let mut config = Configuration::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides should apply");

        assert_eq!(config.runner.nb_procs, 6);
        assert_eq!(config.directories.dataset, PathBuf::from("/mnt/ds"));
        assert_eq!(config.directories.reproduced_results, PathBuf::from("/mnt/results"));
    }

    #[test]
    fn test_invalid_override() {
        let mut config = Configuration::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_NB_PROCS).then(|| "many".to_string())
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains(ENV_NB_PROCS));
    }

    #[test]
    fn test_validation_zero_procs() {
        let config = Configuration::default().with_nb_procs(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("nb_procs"));
    }

    #[test]
    fn test_validation_empty_dataset() {
        let config = Configuration::default().with_dataset_dir("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = Configuration::new()
            .with_nb_procs(4)
            .with_dataset_dir("/ds")
            .with_results_dir("/out")
            .with_exclusions("2T6S", vec!["001".into()]);

        assert_eq!(config.runner.nb_procs, 4);
        assert_eq!(config.directories.dataset, PathBuf::from("/ds"));
        assert_eq!(config.directories.reproduced_results, PathBuf::from("/out"));
        assert_eq!(config.participants.exclusions.len(), 1);
    }
}
