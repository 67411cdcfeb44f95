use thiserror::Error;

/// Error taxonomy for the archiver.
///
/// Only `Authentication` and `MissingConfiguration` are allowed to abort
/// startup. `Storage` halts the single upload it occurred in. Everything
/// else is downgraded to data (an unknown file row) or a status field
/// before it can cross the cycle boundary.
#[derive(Debug, Error)]
pub enum ArchiverError {
    #[error("failed to authenticate with '{service}'")]
    Authentication { service: String },

    #[error("required configuration '{0}' is not defined")]
    MissingConfiguration(String),

    #[error("storage pool error: {0}")]
    Storage(String),

    #[error("could not identify a hosting service for url '{0}'")]
    UnknownHostingService(String),

    #[error("file not found at '{0}'")]
    FileNotFound(String),

    #[error("request to '{url}' failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },
}

impl ArchiverError {
    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.into(),
        }
    }
}

/// Bail out unless the response carries a success status.
///
/// # Errors
///
/// Returns [`ArchiverError::HttpStatus`] for any non-2xx response.
pub fn assert_is_ok(res: &reqwest::Response) -> Result<(), ArchiverError> {
    if res.status().is_success() {
        Ok(())
    } else {
        Err(ArchiverError::HttpStatus {
            url: res.url().to_string(),
            status: res.status().as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArchiverError::UnknownHostingService("https://nowhere.example/x".to_string());
        assert!(err.to_string().contains("nowhere.example"));

        let err = ArchiverError::HttpStatus {
            url: "https://host.example/f".to_string(),
            status: 404,
        };
        assert!(err.to_string().contains("404"));
    }
}
