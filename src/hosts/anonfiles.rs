use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};

use super::traits::{HostContext, HostingService};
use crate::error::ArchiverError;

/// Adapter for anonfiles.com single-file pages.
pub struct AnonFilesHandler;

impl AnonFilesHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for AnonFilesHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostingService for AnonFilesHandler {
    fn name(&self) -> &'static str {
        "AnonFiles"
    }

    fn base_url(&self) -> &'static str {
        "https://anonfiles.com/"
    }

    async fn file_names(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let (status, body, _) = super::fetch_page(ctx, url).await?;
        assert_exists(status, url)?;
        Ok(vec![parse_file_name(&body, url)?])
    }

    async fn download_urls(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let (status, body, _) = super::fetch_page(ctx, url).await?;
        assert_exists(status, url)?;
        // CDN URLs are per-file and not derivable from the page URL.
        Ok(vec![parse_download_url(&body, url)?])
    }
}

fn assert_exists(status: StatusCode, url: &str) -> Result<(), ArchiverError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ArchiverError::FileNotFound(url.to_string()));
    }
    Ok(())
}

fn parse_download_url(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("#download-url").expect("valid selector");
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(ToString::to_string)
        .with_context(|| format!("no download link on '{url}'"))
}

fn parse_file_name(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(".top-wrapper h1").expect("valid selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .with_context(|| format!("no file heading on '{url}'"))
}
