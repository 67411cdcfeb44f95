use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures_util::StreamExt;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, error, info, warn};
use url::Url;

use super::traits::{HostContext, HostingService};
use crate::error::{assert_is_ok, ArchiverError};

/// Base timeout for the first browser-driven challenge attempt.
const CHALLENGE_BASE_TIMEOUT: Duration = Duration::from_secs(15);

/// Total challenge attempts before giving up. The timeout doubles on each
/// failure.
const CHALLENGE_ATTEMPTS: u32 = 4;

static NAME_PATTERN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"Name: (.*)").unwrap());

/// Adapter for dbree.org.
///
/// The site sits behind an anti-automation challenge that plain HTTP cannot
/// pass. `prime_session` drives a real browser through the challenge once
/// and transplants the resulting cookies into the shared HTTP client; if it
/// fails, subsequent fetches simply fail and surface as unknown files.
///
/// Dead files are signalled by a redirect back to `/index.html` rather than
/// a status code.
pub struct DbreeHandler;

impl DbreeHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for DbreeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostingService for DbreeHandler {
    fn name(&self) -> &'static str {
        "DBREE"
    }

    fn base_url(&self) -> &'static str {
        "https://dbree.org/"
    }

    async fn file_names(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let body = self.fetch_live_page(ctx, url).await?;
        Ok(vec![parse_file_name(&body, url)?])
    }

    async fn download_urls(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let body = self.fetch_live_page(ctx, url).await?;
        // Download URLs are generated per visit and cannot be derived, so
        // the page link is authoritative.
        Ok(vec![parse_download_url(&body, url)?])
    }

    async fn prime_session(&self, ctx: &HostContext) -> Result<()> {
        let mut timeout = CHALLENGE_BASE_TIMEOUT;
        for attempt in 1..=CHALLENGE_ATTEMPTS {
            match solve_challenge(ctx, self.base_url(), timeout).await {
                Ok(cookie_count) => {
                    info!(attempt, cookie_count, "DBREE challenge passed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, timeout_secs = timeout.as_secs(), "DBREE challenge attempt failed: {e:#}");
                    timeout *= 2;
                }
            }
        }
        // Non-fatal: the scraper keeps running, DBREE URLs will resolve as
        // unknown files until the next priming.
        error!(
            attempts = CHALLENGE_ATTEMPTS,
            "DBREE challenge could not be passed; continuing without bypass cookies"
        );
        Ok(())
    }
}

impl DbreeHandler {
    /// Fetch a file page, applying the redirect-to-index existence check.
    async fn fetch_live_page(&self, ctx: &HostContext, url: &str) -> Result<String> {
        let res = ctx.client.get(url).send().await?;
        assert_is_ok(&res)?;
        if res.url().path() == "/index.html" {
            return Err(ArchiverError::FileNotFound(url.to_string()).into());
        }
        Ok(res.text().await?)
    }
}

/// Drive a headless browser through the challenge page and copy its cookies
/// into the plain HTTP cookie jar.
async fn solve_challenge(ctx: &HostContext, base_url: &str, timeout: Duration) -> Result<usize> {
    let config = BrowserConfig::builder()
        .no_sandbox()
        .request_timeout(timeout)
        .build()
        .map_err(|e| anyhow!("browser config: {e}"))?;

    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .context("Failed to launch headless browser")?;
    let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let result = tokio::time::timeout(timeout, async {
        let page = browser.new_page(base_url).await?;
        page.wait_for_navigation().await?;
        page.get_cookies().await.context("Failed to read browser cookies")
    })
    .await
    .map_err(|_| anyhow!("challenge page did not settle within {}s", timeout.as_secs()))?;

    let _ = browser.close().await;
    handler_task.abort();

    let cookies = result?;
    let target = Url::parse(base_url)?;
    for cookie in &cookies {
        let header = format!("{}={}; Domain={}", cookie.name, cookie.value, cookie.domain);
        ctx.jar.add_cookie_str(&header, &target);
        debug!(name = %cookie.name, "Transplanted challenge cookie");
    }
    Ok(cookies.len())
}

fn parse_download_url(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("a").expect("valid selector");
    let href = document
        .select(&selector)
        .find(|el| el.text().collect::<String>().trim() == "Download")
        .and_then(|el| el.value().attr("href"))
        .with_context(|| format!("no download link on '{url}'"))?;

    // DBREE emits protocol-relative download links.
    if let Some(rest) = href.strip_prefix("//") {
        Ok(format!("https://{rest}"))
    } else {
        Ok(href.to_string())
    }
}

fn parse_file_name(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("li").expect("valid selector");
    document
        .select(&selector)
        .find_map(|el| {
            let text = el.text().collect::<String>();
            NAME_PATTERN
                .captures(text.trim())
                .map(|caps| caps[1].to_string())
        })
        .with_context(|| format!("no file name listed on '{url}'"))
}
