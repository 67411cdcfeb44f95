use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::util::update_locked_json;

/// The most recent failure, kept for external monitoring. This is a single
/// slot, not a log; the durable critical log holds history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastError {
    pub error: String,
    pub trace: String,
    /// Epoch seconds when the failure was recorded.
    pub time: i64,
}

/// Durable scraper status document read by external monitoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperStatus {
    /// Epoch seconds of the last completed cycle.
    pub last_scraped: i64,
    pub last_error: Option<LastError>,
    pub sections_scraped: Vec<String>,
}

impl ScraperStatus {
    /// Record the end of a cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the status document cannot be written.
    pub fn record_scraped(path: &Path, sections: &[String]) -> Result<()> {
        let sections = sections.to_vec();
        update_locked_json(path, |status: &mut Self| {
            status.last_scraped = Utc::now().timestamp();
            status.sections_scraped = sections;
        })?;
        Ok(())
    }

    /// Record a caught page- or cycle-level failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the status document cannot be written.
    pub fn record_error(path: &Path, error: &str, trace: &str) -> Result<()> {
        let last_error = LastError {
            error: error.to_string(),
            trace: trace.to_string(),
            time: Utc::now().timestamp(),
        };
        update_locked_json(path, |status: &mut Self| {
            status.last_error = Some(last_error);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::read_locked_json;

    #[test]
    fn test_status_updates_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        ScraperStatus::record_error(&path, "boom", "trace here").unwrap();
        ScraperStatus::record_scraped(&path, &["hip-hop-leaks".to_string()]).unwrap();

        let status: ScraperStatus = read_locked_json(&path).unwrap().unwrap();
        // Recording a successful cycle must not clear the error slot.
        assert_eq!(status.last_error.as_ref().unwrap().error, "boom");
        assert!(status.last_scraped > 0);
        assert_eq!(status.sections_scraped, vec!["hip-hop-leaks".to_string()]);
    }
}
