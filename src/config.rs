use std::path::PathBuf;

use thiserror::Error;

use crate::storage::DEFAULT_USAGE_CUTOFF;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as float: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Forum
    pub forum_base_url: String,
    pub forum_credentials_file: PathBuf,

    // Database
    pub database_path: PathBuf,

    // Storage pool
    pub storage_credentials_dir: PathBuf,
    pub quota_cache_path: PathBuf,
    pub usage_cutoff: f64,

    // Scraper state documents
    pub scraper_config_path: PathBuf,
    pub status_path: PathBuf,
    pub critical_log_path: PathBuf,
    pub unhandled_url_log_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Forum
            forum_base_url: env_or_default("FORUM_BASE_URL", "https://leaked.cx"),
            forum_credentials_file: PathBuf::from(required_env("FORUM_CREDENTIALS_FILE")?),

            // Database
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/archive.sqlite")),

            // Storage pool
            storage_credentials_dir: PathBuf::from(required_env("STORAGE_CREDENTIALS_DIR")?),
            quota_cache_path: PathBuf::from(env_or_default(
                "QUOTA_CACHE_PATH",
                "./data/quota_cache.json",
            )),
            usage_cutoff: parse_env_f64("STORAGE_USAGE_CUTOFF", DEFAULT_USAGE_CUTOFF)?,

            // Scraper state documents
            scraper_config_path: PathBuf::from(env_or_default(
                "SCRAPER_CONFIG_PATH",
                "./data/scraper_config.json",
            )),
            status_path: PathBuf::from(env_or_default(
                "SCRAPER_STATUS_PATH",
                "./data/scraper_status.json",
            )),
            critical_log_path: PathBuf::from(env_or_default(
                "CRITICAL_LOG_PATH",
                "./data/critical_log.txt",
            )),
            unhandled_url_log_path: PathBuf::from(env_or_default(
                "UNHANDLED_URL_LOG_PATH",
                "./data/unhandled_urls.txt",
            )),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forum_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.forum_base_url.ends_with('/') {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "must not end with '/'".to_string(),
            });
        }
        if !self.forum_credentials_file.is_file() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_CREDENTIALS_FILE".to_string(),
                message: format!("{} is not a file", self.forum_credentials_file.display()),
            });
        }
        if !self.storage_credentials_dir.is_dir() {
            return Err(ConfigError::InvalidValue {
                name: "STORAGE_CREDENTIALS_DIR".to_string(),
                message: format!("{} is not a directory", self.storage_credentials_dir.display()),
            });
        }
        if !(0.0..=1.0).contains(&self.usage_cutoff) {
            return Err(ConfigError::InvalidValue {
                name: "STORAGE_USAGE_CUTOFF".to_string(),
                message: format!("must be within 0..=1, got {}", self.usage_cutoff),
            });
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_f64(name: &str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_cutoff_range() {
        let dir = tempfile::tempdir().unwrap();
        let creds = dir.path().join("forum.json");
        std::fs::write(&creds, "{}").unwrap();

        let config = Config {
            forum_base_url: "https://leaked.cx".to_string(),
            forum_credentials_file: creds,
            database_path: PathBuf::from("./data/archive.sqlite"),
            storage_credentials_dir: dir.path().to_path_buf(),
            quota_cache_path: PathBuf::from("./data/quota_cache.json"),
            usage_cutoff: 1.5,
            scraper_config_path: PathBuf::from("./data/scraper_config.json"),
            status_path: PathBuf::from("./data/scraper_status.json"),
            critical_log_path: PathBuf::from("./data/critical_log.txt"),
            unhandled_url_log_path: PathBuf::from("./data/unhandled_urls.txt"),
        };
        assert!(config.validate().is_err());

        let valid = Config {
            usage_cutoff: DEFAULT_USAGE_CUTOFF,
            ..config
        };
        assert!(valid.validate().is_ok());
    }
}
