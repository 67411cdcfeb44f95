//! Hosting-service adapters and the URL resolver built on top of them.
//!
//! Each adapter knows how one third-party file host works: how to find a
//! file's display name, how to obtain direct download URLs, and (for some)
//! how to get past anti-automation or authenticate an API session.

pub mod netloc;
pub mod registry;
pub mod resolver;
mod traits;

pub mod anonfiles;
pub mod dbree;
pub mod gofile;
pub mod onlyfiles;
pub mod onlyfiles_cc;

pub use registry::HostRegistry;
pub use resolver::{resolve, Resolution, ResolvedFile, UnknownFile};
pub use traits::{HostContext, HostingService};

use anyhow::Result;
use reqwest::StatusCode;
use url::Url;

/// Build the registry of supported hosts in priority order.
#[must_use]
pub fn default_registry() -> HostRegistry {
    let mut registry = HostRegistry::new();
    registry.register(Box::new(onlyfiles::OnlyFilesHandler::new()));
    registry.register(Box::new(onlyfiles_cc::OnlyFilesCcHandler::new()));
    registry.register(Box::new(dbree::DbreeHandler::new()));
    registry.register(Box::new(anonfiles::AnonFilesHandler::new()));
    registry.register(Box::new(gofile::GofileHandler::new()));
    registry
}

/// GET a host page, returning the status, body text and final URL after
/// redirects. Status checking is left to the caller because "not found" is
/// signalled differently per host.
async fn fetch_page(ctx: &HostContext, url: &str) -> Result<(StatusCode, String, Url)> {
    let res = ctx.client.get(url).send().await?;
    let status = res.status();
    let final_url = res.url().clone();
    let body = res.text().await?;
    Ok((status, body, final_url))
}
