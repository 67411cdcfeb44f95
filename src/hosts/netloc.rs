use url::Url;

use crate::error::ArchiverError;

/// The host+domain portion of a URL with subdomains stripped.
///
/// Hosting services commonly answer on both `www.host.tld` and `host.tld`,
/// so adapter matching compares only the last two labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Netloc {
    pub host_name: String,
    pub domain_name: String,
}

impl Netloc {
    /// Parse the host+domain out of a URL.
    ///
    /// # Errors
    ///
    /// Returns a parse error for URLs without a recognizable host.
    pub fn parse(url: &str) -> Result<Self, ArchiverError> {
        let parsed =
            Url::parse(url).map_err(|e| ArchiverError::parse("url", format!("'{url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ArchiverError::parse("url", format!("'{url}' has no host")))?;

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < 2 {
            return Err(ArchiverError::parse(
                "url",
                format!("'{url}' host has no domain"),
            ));
        }
        Ok(Self {
            host_name: labels[labels.len() - 2].to_ascii_lowercase(),
            domain_name: labels[labels.len() - 1].to_ascii_lowercase(),
        })
    }

    /// Whether two netlocs refer to the same service, ignoring subdomains.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.host_name == other.host_name && self.domain_name == other.domain_name
    }
}
