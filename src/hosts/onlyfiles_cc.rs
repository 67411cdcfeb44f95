use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use scraper::{Html, Selector};

use super::traits::{HostContext, HostingService};
use crate::error::ArchiverError;

/// Adapter for onlyfiles.cc single-file pages.
///
/// Unlike its .biz sibling, this host answers a plain 404 for dead files.
pub struct OnlyFilesCcHandler;

impl OnlyFilesCcHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for OnlyFilesCcHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostingService for OnlyFilesCcHandler {
    fn name(&self) -> &'static str {
        "OnlyFiles (CC)"
    }

    fn base_url(&self) -> &'static str {
        "https://onlyfiles.cc/"
    }

    async fn file_names(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let (status, body, _) = super::fetch_page(ctx, url).await?;
        assert_exists(status, url)?;
        Ok(vec![parse_title(&body, url)?])
    }

    async fn download_urls(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let (status, body, final_url) = super::fetch_page(ctx, url).await?;
        assert_exists(status, url)?;
        // The audio src is relative to the page; scraped rather than derived
        // because the site's URL scheme shifts frequently.
        let src = parse_audio_src(&body, url)?;
        let download = final_url
            .join(&src)
            .with_context(|| format!("could not resolve audio src '{src}' against '{url}'"))?;
        Ok(vec![download.to_string()])
    }
}

fn assert_exists(status: StatusCode, url: &str) -> Result<(), ArchiverError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ArchiverError::FileNotFound(url.to_string()));
    }
    Ok(())
}

fn parse_title(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("#title").expect("valid selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .with_context(|| format!("no #title element on '{url}'"))
}

fn parse_audio_src(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("audio").expect("valid selector");
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("src"))
        .map(ToString::to_string)
        .with_context(|| format!("no audio element on '{url}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    const FILE_PAGE: &str = r#"
        <html><body>
            <h1 id="title">snippet.mp3</h1>
            <audio src="audio/snippet.mp3" controls></audio>
        </body></html>
    "#;

    #[test]
    fn test_parse_title() {
        assert_eq!(
            parse_title(FILE_PAGE, "https://onlyfiles.cc/f/abc").unwrap(),
            "snippet.mp3"
        );
    }

    #[test]
    fn test_parse_audio_src() {
        assert_eq!(
            parse_audio_src(FILE_PAGE, "https://onlyfiles.cc/f/abc").unwrap(),
            "audio/snippet.mp3"
        );
    }

    #[test]
    fn test_not_found_via_status() {
        let err = assert_exists(StatusCode::NOT_FOUND, "https://onlyfiles.cc/f/gone").unwrap_err();
        assert!(matches!(err, ArchiverError::FileNotFound(_)));
        assert!(assert_exists(StatusCode::OK, "https://onlyfiles.cc/f/ok").is_ok());
    }

    #[test]
    fn test_relative_src_resolution() {
        let page = Url::parse("https://onlyfiles.cc/f/abc").unwrap();
        let joined = page.join("audio/snippet.mp3").unwrap();
        assert_eq!(joined.as_str(), "https://onlyfiles.cc/f/audio/snippet.mp3");
    }
}
