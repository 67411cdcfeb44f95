use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::traits::{HostContext, HostingService};

/// Authenticated calls are retried with one fresh login per attempt, at
/// most this many times, before the auth failure propagates.
const AUTH_RETRY_CAP: u32 = 5;

/// Adapter for gofile.io, a full upload+download JSON API.
///
/// A guest account token is created lazily on first use and reused for the
/// life of the process. Folder URLs (`/d/<code>`) map to several underlying
/// files and yield parallel name/url lists.
pub struct GofileHandler {
    api_base: String,
    upload_base: Option<String>,
    token: tokio::sync::Mutex<Option<String>>,
}

impl GofileHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_base: "https://api.gofile.io".to_string(),
            upload_base: None,
            token: tokio::sync::Mutex::new(None),
        }
    }

    /// Point the adapter at alternate API endpoints. Used by tests.
    #[must_use]
    pub fn with_endpoints(api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            upload_base: Some(upload_base.into()),
            token: tokio::sync::Mutex::new(None),
        }
    }
}

impl Default for GofileHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostingService for GofileHandler {
    fn name(&self) -> &'static str {
        "GoFile"
    }

    fn base_url(&self) -> &'static str {
        "https://gofile.io/"
    }

    async fn file_names(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let contents = self.contents(ctx, &content_code(url)?).await?;
        Ok(child_entries(&contents)?.into_iter().map(|(name, _)| name).collect())
    }

    async fn download_urls(&self, ctx: &HostContext, url: &str) -> Result<Vec<String>> {
        let contents = self.contents(ctx, &content_code(url)?).await?;
        Ok(child_entries(&contents)?.into_iter().map(|(_, link)| link).collect())
    }

    async fn fetch(&self, ctx: &HostContext, download_url: &str) -> Result<Vec<u8>> {
        // Direct links only answer when the account token rides along.
        let token = self.token(ctx).await?;
        let res = ctx
            .client
            .get(download_url)
            .header("Cookie", format!("accountToken={token}"))
            .send()
            .await?;
        crate::error::assert_is_ok(&res)?;
        Ok(res.bytes().await?.to_vec())
    }

    async fn upload(&self, ctx: &HostContext, name: &str, bytes: &[u8]) -> Result<String> {
        let server_base = match &self.upload_base {
            Some(base) => base.clone(),
            None => {
                let servers = self.authed_get(ctx, &format!("{}/servers", self.api_base)).await?;
                let server = servers["data"]["servers"][0]["name"]
                    .as_str()
                    .context("no upload server advertised")?;
                format!("https://{server}.gofile.io")
            }
        };

        let token = self.token(ctx).await?;
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(name.to_string());
        let form = reqwest::multipart::Form::new()
            .text("token", token)
            .part("file", part);
        let res = ctx
            .client
            .post(format!("{server_base}/contents/uploadfile"))
            .multipart(form)
            .send()
            .await?;
        crate::error::assert_is_ok(&res)?;
        let body: Value = res.json().await?;
        let page = body["data"]["downloadPage"]
            .as_str()
            .context("upload response missing download page")?;
        info!(name, page, "Uploaded file to GoFile");
        Ok(page.to_string())
    }
}

impl GofileHandler {
    /// Get the cached account token, creating a guest account on first use.
    async fn token(&self, ctx: &HostContext) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let res = ctx
            .client
            .post(format!("{}/accounts", self.api_base))
            .send()
            .await?;
        crate::error::assert_is_ok(&res)?;
        let body: Value = res.json().await?;
        let token = body["data"]["token"]
            .as_str()
            .context("account response missing token")?
            .to_string();
        debug!("Created GoFile guest account");
        *guard = Some(token.clone());
        Ok(token)
    }

    /// GET an API path with the account token, re-authenticating on
    /// auth-shaped failures up to [`AUTH_RETRY_CAP`] times.
    async fn authed_get(&self, ctx: &HostContext, url: &str) -> Result<Value> {
        for _ in 0..=AUTH_RETRY_CAP {
            let token = self.token(ctx).await?;
            let res = ctx.client.get(url).bearer_auth(&token).send().await?;
            let status = res.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                debug!(url, "GoFile token rejected, re-authenticating");
                *self.token.lock().await = None;
                continue;
            }
            crate::error::assert_is_ok(&res)?;
            let body: Value = res.json().await?;
            if body["status"].as_str() == Some("error-auth") {
                debug!(url, "GoFile token rejected, re-authenticating");
                *self.token.lock().await = None;
                continue;
            }
            return Ok(body);
        }
        bail!("GoFile authentication failed after {AUTH_RETRY_CAP} retries")
    }

    async fn contents(&self, ctx: &HostContext, code: &str) -> Result<Value> {
        self.authed_get(ctx, &format!("{}/contents/{code}", self.api_base))
            .await
    }
}

/// The content code is the last path segment of a `/d/<code>` page URL.
fn content_code(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("no content code in '{url}'"))
}

/// Pull `(name, link)` pairs out of a contents response.
///
/// Children are ordered by child id so the two parallel lists always line
/// up between separate `file_names`/`download_urls` calls.
fn child_entries(contents: &Value) -> Result<Vec<(String, String)>> {
    let data = &contents["data"];
    if data["type"].as_str() == Some("file") {
        let name = data["name"].as_str().context("file entry missing name")?;
        let link = data["link"].as_str().context("file entry missing link")?;
        return Ok(vec![(name.to_string(), link.to_string())]);
    }

    let children = data["children"]
        .as_object()
        .context("contents response missing children")?;
    let mut ids: Vec<&String> = children.keys().collect();
    ids.sort();

    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let child = &children[id];
        if child["type"].as_str() != Some("file") {
            continue;
        }
        let name = child["name"].as_str().context("child missing name")?;
        let link = child["link"].as_str().context("child missing link")?;
        entries.push((name.to_string(), link.to_string()));
    }
    Ok(entries)
}
