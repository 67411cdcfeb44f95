use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use super::registry::HostRegistry;
use super::traits::{HostContext, HostingService};
use crate::error::ArchiverError;

/// One file successfully resolved to bytes.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub file_name: String,
    pub download_url: String,
    pub hosting_service: &'static str,
    pub bytes: Vec<u8>,
}

/// A URL that could not be resolved, with the causal error preserved.
#[derive(Debug, Clone)]
pub struct UnknownFile {
    pub error: String,
    pub trace: String,
}

/// Outcome of resolving one embedded URL.
///
/// This is deliberately a value, not an error: resolution failure must
/// never abort the caller's batch of URLs.
#[derive(Debug)]
pub enum Resolution {
    Resolved(Vec<ResolvedFile>),
    Unknown(UnknownFile),
}

impl Resolution {
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// Resolve an arbitrary URL into downloaded files.
///
/// Any failure anywhere in the adapter pipeline - no claiming adapter,
/// not-found markers, HTTP errors, parse errors - is converted into
/// [`Resolution::Unknown`] here and goes no further.
pub async fn resolve(ctx: &HostContext, registry: &HostRegistry, url: &str) -> Resolution {
    let Some(host) = registry.find_host(url) else {
        let err = ArchiverError::UnknownHostingService(url.to_string());
        debug!(url, "No hosting service claims url");
        return Resolution::Unknown(UnknownFile {
            error: err.to_string(),
            trace: format!("{err:?}"),
        });
    };

    match resolve_with(ctx, host, url).await {
        Ok(files) => Resolution::Resolved(files),
        Err(e) => {
            warn!(url, service = host.name(), "Resolution failed: {e:#}");
            Resolution::Unknown(UnknownFile {
                error: format!("{e:#}"),
                trace: format!("{e:?}"),
            })
        }
    }
}

/// The per-adapter pipeline: names, URLs, then bytes for each direct URL.
async fn resolve_with(
    ctx: &HostContext,
    host: &dyn HostingService,
    url: &str,
) -> Result<Vec<ResolvedFile>> {
    let names = host.file_names(ctx, url).await?;
    let urls = host.download_urls(ctx, url).await?;
    if names.len() != urls.len() {
        // Parallel lists must zip exactly; anything else is an adapter bug.
        return Err(anyhow!(
            "adapter '{}' returned {} names but {} urls for '{url}'",
            host.name(),
            names.len(),
            urls.len()
        ));
    }

    let mut files = Vec::with_capacity(names.len());
    for (file_name, download_url) in names.into_iter().zip(urls) {
        let bytes = host.fetch(ctx, &download_url).await?;
        debug!(
            url,
            file = %file_name,
            size = bytes.len(),
            service = host.name(),
            "Resolved file"
        );
        files.push(ResolvedFile {
            file_name,
            download_url,
            hosting_service: host.name(),
            bytes,
        });
    }
    Ok(files)
}
