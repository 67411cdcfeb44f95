use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::util::{read_locked_json, update_locked_json};

/// Operator-editable scraper settings, hot-reloaded at the start of every
/// cycle.
///
/// Every field defaults from the baseline below, so a hand-edited document
/// missing fields (or an empty file) always yields a usable config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Milliseconds to sleep between cycles.
    pub timeout_interval: u64,
    /// Whether re-sighted posts get their listing-derived fields updated.
    pub update_posts: bool,
    /// Cap on retry attempts for unknown files.
    pub max_retries: i64,
    /// Echo each ingested post title to stdout.
    pub print_posts_scraped: bool,
    /// Log level applied at the start of each cycle ("error", "info", ...).
    pub log_level: String,
    /// Listing pages fetched per section on the very first cycle, to catch
    /// up after downtime.
    pub initial_pages_scraped: u32,
    /// Listing pages fetched per section on every later cycle.
    pub subsequent_pages_scraped: u32,
    /// Minutes between deletion sweeps.
    pub check_deleted_interval: u64,
    /// How many most-recent posts each deletion sweep probes.
    pub check_deleted_depth: i64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            timeout_interval: 30_000,
            update_posts: false,
            max_retries: 3,
            print_posts_scraped: false,
            log_level: "error".to_string(),
            initial_pages_scraped: 4,
            subsequent_pages_scraped: 1,
            check_deleted_interval: 60,
            check_deleted_depth: 50,
        }
    }
}

impl ScraperConfig {
    /// Load the config document, falling back to the baseline when the file
    /// is absent or unreadable. Reload never interrupts the cycle loop.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match read_locked_json(path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Could not reload scraper config, using baseline: {e:#}");
                Self::default()
            }
        }
    }

    /// Persist the config as a whole-document replace under lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.clone();
        update_locked_json(path, |config: &mut Self| *config = snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_fields_default_from_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper_config.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(br#"{"update_posts": true, "max_retries": 7}"#)
            .unwrap();

        let config = ScraperConfig::load(&path);
        assert!(config.update_posts);
        assert_eq!(config.max_retries, 7);
        // Everything else comes from the baseline.
        assert_eq!(config.timeout_interval, 30_000);
        assert_eq!(config.initial_pages_scraped, 4);
        assert_eq!(config.subsequent_pages_scraped, 1);
    }

    #[test]
    fn test_absent_file_is_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScraperConfig::load(&dir.path().join("nope.json"));
        assert_eq!(config, ScraperConfig::default());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper_config.json");

        let mut config = ScraperConfig::default();
        config.update_posts = true;
        config.save(&path).unwrap();

        assert_eq!(ScraperConfig::load(&path), config);
    }
}
