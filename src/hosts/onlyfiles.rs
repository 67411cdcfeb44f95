use anyhow::{Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};

use super::traits::{HostContext, HostingService};
use crate::error::ArchiverError;

/// Adapter for onlyfiles.biz single-file pages.
///
/// The site serves 200 even for missing files; an empty `#name` element is
/// how its own frontend detects a dead file, so we use the same check.
pub struct OnlyFilesHandler;

impl OnlyFilesHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for OnlyFilesHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostingService for OnlyFilesHandler {
    fn name(&self) -> &'static str {
        "OnlyFiles (Biz)"
    }

    fn base_url(&self) -> &'static str {
        "https://www.onlyfiles.biz/"
    }

    async fn file_names(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let (_, body, _) = super::fetch_page(ctx, url).await?;
        Ok(vec![parse_file_name(&body, url)?])
    }

    async fn download_urls(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let (_, body, _) = super::fetch_page(ctx, url).await?;
        Ok(vec![format!(
            "{}{}",
            self.base_url(),
            parse_source_path(&body, url)?
        )])
    }
}

fn assert_exists(document: &Html, url: &str) -> Result<(), ArchiverError> {
    let name_selector = Selector::parse("#name").expect("valid selector");
    let name = document.select(&name_selector).next();
    let name_text = name.map(|el| el.text().collect::<String>()).unwrap_or_default();
    if name_text.trim().is_empty() {
        return Err(ArchiverError::FileNotFound(url.to_string()));
    }
    Ok(())
}

fn parse_file_name(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    assert_exists(&document, url)?;

    let meta_selector = Selector::parse(r#"meta[name="title"]"#).expect("valid selector");
    document
        .select(&meta_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(ToString::to_string)
        .with_context(|| format!("no title meta tag on '{url}'"))
}

/// The player source path is scraped rather than derived: the site appears
/// to append a "type" query parameter to the file id, but the scheme is
/// undocumented, so trusting the page is safer.
fn parse_source_path(body: &str, url: &str) -> Result<String> {
    let document = Html::parse_document(body);
    assert_exists(&document, url)?;

    let source_selector = Selector::parse(".player source").expect("valid selector");
    document
        .select(&source_selector)
        .next()
        .and_then(|el| el.value().attr("src"))
        .map(ToString::to_string)
        .with_context(|| format!("no player source on '{url}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_PAGE: &str = r#"
        <html><head><meta name="title" content="track.mp3"></head>
        <body>
            <span id="name">track.mp3</span>
            <div class="player"><video><source src="dl/track.mp3?type=audio"></video></div>
        </body></html>
    "#;

    const MISSING_PAGE: &str = r#"
        <html><body><span id="name"></span></body></html>
    "#;

    #[test]
    fn test_parse_file_name() {
        let name = parse_file_name(FILE_PAGE, "https://onlyfiles.biz/f/1").unwrap();
        assert_eq!(name, "track.mp3");
    }

    #[test]
    fn test_parse_source_path() {
        let path = parse_source_path(FILE_PAGE, "https://onlyfiles.biz/f/1").unwrap();
        assert_eq!(path, "dl/track.mp3?type=audio");
    }

    #[test]
    fn test_missing_file_detected() {
        let err = parse_file_name(MISSING_PAGE, "https://onlyfiles.biz/f/404").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_is_host_for() {
        let handler = OnlyFilesHandler::new();
        assert!(handler.is_host_for("https://onlyfiles.biz/f/1").unwrap());
        assert!(handler.is_host_for("https://www.onlyfiles.biz/f/1").unwrap());
        assert!(!handler.is_host_for("https://onlyfiles.cc/f/1").unwrap());
    }
}
