//! Shared constants used across the application.

/// User agent string used when no per-account user agent is configured.
///
/// A realistic browser user agent keeps scraping requests indistinguishable
/// from normal browser traffic.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Schema version prefixed onto native thread ids.
///
/// Bumped whenever the forum resets its database, so ids from before and
/// after a reset never collide ("1.12345" vs "2.12345").
pub const SCHEMA_VERSION: u32 = 1;

/// Format a site-numeric thread id into a schema-versioned native id.
#[must_use]
pub fn format_native_id(site_id: u64) -> String {
    format!("{SCHEMA_VERSION}.{site_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_native_id() {
        assert_eq!(format_native_id(12345), format!("{SCHEMA_VERSION}.12345"));
    }
}
