use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use tracing::debug;

use super::netloc::Netloc;
use crate::constants::DEFAULT_USER_AGENT;
use crate::error::{assert_is_ok, ArchiverError};

/// Shared HTTP state handed to every adapter call.
///
/// The cookie jar is exposed separately so session-priming adapters can
/// transplant browser cookies into the plain HTTP client.
#[derive(Clone)]
pub struct HostContext {
    pub client: reqwest::Client,
    pub jar: Arc<Jar>,
}

impl HostContext {
    /// Build a cookie-carrying client for adapter traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new() -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .cookie_provider(Arc::clone(&jar))
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self { client, jar })
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext").finish_non_exhaustive()
    }
}

/// Strategy interface for one third-party file-hosting site.
///
/// Single-file hosts return length-1 lists from `file_names` and
/// `download_urls`; folder hosts return parallel lists. The two lists must
/// zip exactly - a length mismatch is an adapter defect and is surfaced by
/// the resolver.
#[async_trait]
pub trait HostingService: Send + Sync {
    /// Human-readable service name, stored on file records.
    fn name(&self) -> &'static str;

    /// Canonical base URL of the service, used for netloc matching.
    fn base_url(&self) -> &'static str;

    /// Whether this adapter claims the URL (host+domain match, subdomains
    /// ignored).
    ///
    /// # Errors
    ///
    /// Returns an error for malformed URLs, which the resolver treats as
    /// "stop matching, nothing claims this".
    fn is_host_for(&self, url: &str) -> Result<bool, ArchiverError> {
        let target = Netloc::parse(url)?;
        let own = Netloc::parse(self.base_url())?;
        Ok(target.matches(&own))
    }

    /// Display names of the file(s) behind the page URL.
    async fn file_names(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>>;

    /// Direct byte-fetchable URLs, parallel to `file_names`.
    async fn download_urls(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>>;

    /// Fetch a direct URL's bytes. Adapters override this only when a plain
    /// GET is not enough (headers, auth tokens).
    async fn fetch(&self, ctx: &HostContext, download_url: &str) -> Result<Vec<u8>> {
        debug!(url = %download_url, service = self.name(), "Downloading file");
        let res = ctx.client.get(download_url).send().await?;
        assert_is_ok(&res)?;
        Ok(res.bytes().await?.to_vec())
    }

    /// One-time session priming (anti-bot bypass). Best-effort: failures are
    /// logged by the implementation and must not be fatal.
    async fn prime_session(&self, _ctx: &HostContext) -> Result<()> {
        Ok(())
    }

    /// Upload content to the service, returning a page URL for it.
    ///
    /// Only upload-capable hosts implement this; it exists for adapter
    /// self-tests and for re-hosting onto the service itself.
    async fn upload(&self, _ctx: &HostContext, _name: &str, _bytes: &[u8]) -> Result<String> {
        anyhow::bail!("'{}' does not support uploads", self.name())
    }
}
