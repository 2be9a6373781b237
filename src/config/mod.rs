use crate::Project;
use crate::store::DB_FILE_NAME;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Log file written while the interactive view owns the terminal.
pub const LOG_FILE_NAME: &str = "review-deck.log";

const DEFAULT_LOOKBACK_DAYS: u32 = 60;
const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Per-project settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    pub repo: String,
    #[serde(default)]
    pub icon: String,
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root for mirrors, the database and the log file.
    pub code_folder: PathBuf,
    /// Window extracted for projects that were never synchronized.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Maximum number of projects synchronized at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Replaces the built-in dependency manifest markers when set.
    #[serde(default)]
    pub manifest_markers: Option<Vec<String>>,
    #[serde(default, rename = "project")]
    pub projects: BTreeMap<String, ProjectConfig>,
}

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate config text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.lookback_days == 0 {
            return Err(ConfigError::Invalid(
                "lookback_days must be at least 1".to_string(),
            ));
        }
        for (name, project) in &self.projects {
            if project.repo.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "project {} has no repo",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Projects sorted by name.
    pub fn projects(&self) -> Vec<Project> {
        // BTreeMap iterates in key order.
        self.projects
            .iter()
            .map(|(name, p)| Project {
                name: name.clone(),
                repo: p.repo.clone(),
                icon: p.icon.clone(),
            })
            .collect()
    }

    pub fn db_path(&self) -> PathBuf {
        self.code_folder.join(DB_FILE_NAME)
    }

    pub fn log_path(&self) -> PathBuf {
        self.code_folder.join(LOG_FILE_NAME)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.lookback_days))
    }
}
