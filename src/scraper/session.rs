use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::constants::DEFAULT_USER_AGENT;
use crate::error::{assert_is_ok, ArchiverError};

/// Forum login credentials, loaded from an operator-provided JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default, rename = "user-agent")]
    pub user_agent: Option<String>,
}

impl Credentials {
    /// Load credentials from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unparseable.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials file {}", path.display()))
    }
}

/// An authenticated session against the forum.
///
/// Login is fatal on failure: a missing session cookie means the
/// credentials are bad, and retrying would only lock the account.
pub struct ForumSession {
    client: reqwest::Client,
    base_url: String,
    /// Expiry of the session cookie as epoch seconds, when advertised.
    pub token_expires: Option<i64>,
}

impl ForumSession {
    /// Establish an authenticated session.
    ///
    /// The XenForo login flow: fetch the base page for a CSRF token, POST
    /// the login form, then require the `xf_user` remember cookie.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiverError::Authentication`] when the session cookie is
    /// absent after login, and transport errors otherwise.
    pub async fn login(base_url: &str, credentials: &Credentials) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .user_agent(
                credentials
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .cookie_provider(Arc::clone(&jar))
            .build()?;

        let csrf = fetch_csrf(&client, base_url).await?;

        let form = [
            ("login", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("remember", "1"),
            ("_xfRedirect", ""),
            ("_xfToken", csrf.as_str()),
        ];
        let res = client
            .post(format!("{base_url}/login/login"))
            .form(&form)
            .send()
            .await?;
        assert_is_ok(&res)?;

        // The remember cookie may be set on an intermediate redirect, so
        // check the final response first and fall back to the jar.
        let mut token_expires = None;
        let mut found = false;
        for cookie in res.cookies() {
            if cookie.name() == "xf_user" {
                found = true;
                token_expires = cookie.expires().and_then(|t| {
                    t.duration_since(std::time::UNIX_EPOCH)
                        .ok()
                        .map(|d| d.as_secs() as i64)
                });
            }
        }
        if !found {
            found = jar_has_cookie(&jar, base_url, "xf_user");
        }
        if !found {
            return Err(ArchiverError::Authentication {
                service: base_url.to_string(),
            }
            .into());
        }

        info!(base_url, "Forum login succeeded");
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token_expires,
        })
    }

    /// GET a path under the forum, asserting success.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-2xx status.
    pub async fn get_text(&self, path_or_url: &str) -> Result<String> {
        let url = if path_or_url.starts_with("http") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        };
        let res = self.client.get(&url).send().await?;
        assert_is_ok(&res)?;
        Ok(res.text().await?)
    }

    /// Probe a URL with a short timeout, returning just the status code.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure (not on error statuses).
    pub async fn probe_status(&self, url: &str) -> Result<u16> {
        let res = self
            .client
            .get(url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;
        Ok(res.status().as_u16())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for ForumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForumSession")
            .field("base_url", &self.base_url)
            .field("token_expires", &self.token_expires)
            .finish_non_exhaustive()
    }
}

/// XenForo publishes the CSRF token as a `data-csrf` attribute on `<html>`.
async fn fetch_csrf(client: &reqwest::Client, base_url: &str) -> Result<String> {
    let res = client.get(base_url).send().await?;
    assert_is_ok(&res)?;
    let body = res.text().await?;
    parse_csrf(&body).ok_or_else(|| {
        ArchiverError::parse("login page", format!("no data-csrf attribute at '{base_url}'"))
            .into()
    })
}

fn parse_csrf(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("html").expect("valid selector");
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("data-csrf"))
        .map(ToString::to_string)
}

fn jar_has_cookie(jar: &Arc<Jar>, base_url: &str, name: &str) -> bool {
    let Ok(url) = Url::parse(base_url) else {
        return false;
    };
    jar.cookies(&url)
        .and_then(|header| header.to_str().ok().map(ToString::to_string))
        .is_some_and(|cookies| {
            cookies
                .split(';')
                .any(|cookie| cookie.trim_start().starts_with(&format!("{name}=")))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csrf() {
        let body = r#"<html data-csrf="token-123"><body></body></html>"#;
        assert_eq!(parse_csrf(body), Some("token-123".to_string()));
        assert_eq!(parse_csrf("<html><body></body></html>"), None);
    }

    #[test]
    fn test_jar_has_cookie() {
        let jar = Arc::new(Jar::default());
        let url = Url::parse("https://forum.example").unwrap();
        jar.add_cookie_str("xf_user=abc123", &url);

        assert!(jar_has_cookie(&jar, "https://forum.example", "xf_user"));
        assert!(!jar_has_cookie(&jar, "https://forum.example", "xf_session"));
    }
}
