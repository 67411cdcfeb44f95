//! The polling loop: listing discovery, ingestion, retries, deletion sweeps.

pub mod config;
pub mod listing;
pub mod post;
pub mod prefix;
pub mod session;
pub mod status;

pub use config::ScraperConfig;
pub use session::{Credentials, ForumSession};
pub use status::ScraperStatus;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;

use crate::config::Config;
use crate::constants::format_native_id;
use crate::db::{self, Database, FileResolution, ListingUpdate, NewFile, NewPost, NewPrefix};
use crate::hosts::resolver::{self, Resolution, ResolvedFile};
use crate::hosts::{HostContext, HostRegistry};
use crate::storage::StoragePool;
use crate::util::{append_log_line, extract_cover};

use listing::{ListingEntry, PrefixRef};
use prefix::PrefixColors;

/// Handle for changing the log filter while the loop is running.
pub type LogLevelHandle = reload::Handle<EnvFilter, Registry>;

/// A forum section the scraper sweeps.
#[derive(Debug, Clone, Copy)]
pub struct Section {
    pub name: &'static str,
    pub id: i64,
    pub path: &'static str,
}

/// The sections under archival. Section ids are the site's own forum ids.
pub const SECTIONS: &[Section] = &[
    Section {
        name: "hip-hop-leaks",
        id: 10,
        path: "/hiphopleaks",
    },
    Section {
        name: "hip-hop-discussion",
        id: 46,
        path: "/hiphopdiscussion",
    },
];

type PostCreatedHook = Box<dyn Fn(&str) + Send + Sync>;

/// The long-running scrape loop and everything it coordinates.
pub struct Scraper {
    session: ForumSession,
    db: Database,
    storage: StoragePool,
    registry: HostRegistry,
    ctx: HostContext,
    config_path: PathBuf,
    status_path: PathBuf,
    critical_log_path: PathBuf,
    unhandled_url_log_path: PathBuf,
    log_handle: Option<LogLevelHandle>,
    post_created_hook: Option<PostCreatedHook>,
    first_cycle: bool,
    last_deleted_sweep: Option<Instant>,
    applied_log_level: String,
    stylesheet_css: Option<String>,
}

impl Scraper {
    /// Assemble the scraper from an authenticated session and its
    /// collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter HTTP client cannot be built.
    pub fn new(
        session: ForumSession,
        db: Database,
        storage: StoragePool,
        app_config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            session,
            db,
            storage,
            registry: crate::hosts::default_registry(),
            ctx: HostContext::new()?,
            config_path: app_config.scraper_config_path.clone(),
            status_path: app_config.status_path.clone(),
            critical_log_path: app_config.critical_log_path.clone(),
            unhandled_url_log_path: app_config.unhandled_url_log_path.clone(),
            log_handle: None,
            post_created_hook: None,
            first_cycle: true,
            last_deleted_sweep: None,
            applied_log_level: String::new(),
            stylesheet_css: None,
        })
    }

    /// Attach the reload handle so `log_level` config edits take effect.
    #[must_use]
    pub fn with_log_handle(mut self, handle: LogLevelHandle) -> Self {
        self.log_handle = Some(handle);
        self
    }

    /// Swap in a different adapter registry (used by integration tests that
    /// point adapters at local servers).
    #[must_use]
    pub fn with_registry(mut self, registry: HostRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register a callback invoked with each newly archived post's native id.
    #[must_use]
    pub fn on_post_created<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.post_created_hook = Some(Box::new(callback));
        self
    }

    /// Run forever. Only startup-class errors escape; every cycle-level
    /// failure is recorded and survived.
    ///
    /// # Errors
    ///
    /// Never returns under normal operation.
    pub async fn run(mut self) -> Result<()> {
        // One-time best-effort session priming (anti-bot cookie transplants).
        for host in self.registry.hosts() {
            if let Err(e) = host.prime_session(&self.ctx).await {
                warn!(service = host.name(), "Session priming failed: {e:#}");
            }
        }

        loop {
            let scraper_config = ScraperConfig::load(&self.config_path);
            self.apply_log_level(&scraper_config.log_level);

            if let Err(e) = self.run_cycle(&scraper_config).await {
                error!("Scrape cycle failed: {e:#}");
                self.record_failure("cycle", &e);
            }

            tokio::time::sleep(Duration::from_millis(scraper_config.timeout_interval)).await;
        }
    }

    /// One full sweep: listings, unknown-file retries, gated deletion probe,
    /// status write. Component failures are recorded and survived here; the
    /// closing status write is the only step allowed to propagate.
    ///
    /// # Errors
    ///
    /// Returns an error if the status document cannot be written.
    pub async fn run_cycle(&mut self, scraper_config: &ScraperConfig) -> Result<()> {
        let pages = if self.first_cycle {
            scraper_config.initial_pages_scraped
        } else {
            scraper_config.subsequent_pages_scraped
        };

        for section in SECTIONS {
            for page in 1..=pages {
                if let Err(e) = self.scrape_listing_page(section, page, scraper_config).await {
                    error!(
                        section = section.name,
                        page, "Listing page scrape failed: {e:#}"
                    );
                    self.record_failure(&format!("section '{}' page {page}", section.name), &e);
                }
            }
        }
        self.first_cycle = false;

        if let Err(e) = self.retry_unknown_files(scraper_config).await {
            error!("Unknown-file retry pass failed: {e:#}");
            self.record_failure("retry pass", &e);
        }

        if self.deletion_sweep_due(scraper_config) {
            if let Err(e) = self.sweep_deleted_posts(scraper_config).await {
                error!("Deletion sweep failed: {e:#}");
                self.record_failure("deletion sweep", &e);
            }
        }

        // The cycle timestamp advances even when a component above failed.
        let section_names: Vec<String> = SECTIONS.iter().map(|s| s.name.to_string()).collect();
        ScraperStatus::record_scraped(&self.status_path, &section_names)?;
        Ok(())
    }

    async fn scrape_listing_page(
        &mut self,
        section: &Section,
        page: u32,
        scraper_config: &ScraperConfig,
    ) -> Result<()> {
        let path = format!(
            "/forums{}/page-{page}/?order=post_date&direction=desc",
            section.path
        );
        let body = self.session.get_text(&path).await?;
        let entries = listing::parse_listing(&body)?;
        debug!(
            section = section.name,
            page,
            entries = entries.len(),
            "Parsed listing page"
        );

        for entry in entries {
            // Prefixes are cataloged per sighting, so a label first seen on
            // an already-archived thread still enters the catalog.
            self.catalog_prefixes(&entry.prefixes).await?;

            let native_id = format_native_id(entry.site_id);
            let existing = db::get_post_by_native_id(self.db.pool(), &native_id).await?;
            match existing {
                Some(_) if scraper_config.update_posts => {
                    let update = listing_update(section, &entry);
                    db::update_post_listing(self.db.pool(), &native_id, &update).await?;
                    debug!(native_id, "Updated listing fields");
                }
                Some(_) => {
                    debug!(native_id, "Already archived, skipping");
                }
                None => {
                    if let Err(e) = self.ingest_post(section, &entry, scraper_config).await {
                        error!(native_id, title = %entry.title, "Post ingestion failed: {e:#}");
                        self.record_failure(&format!("post '{native_id}'"), &e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Full ingestion of a never-seen thread: body, every embedded URL
    /// resolved and uploaded, then one atomic insert.
    async fn ingest_post(
        &self,
        section: &Section,
        entry: &ListingEntry,
        scraper_config: &ScraperConfig,
    ) -> Result<()> {
        let native_id = format_native_id(entry.site_id);
        let page = self.session.get_text(&entry.relative_url).await?;
        let content = post::parse_post_content(&page)?;

        let mut files = Vec::new();
        for url in &content.urls {
            files.extend(self.resolve_to_files(url).await);
        }

        let new_post = NewPost {
            native_id: native_id.clone(),
            section_id: section.id,
            title: entry.title.clone(),
            url: format!("{}{}", self.session.base_url(), entry.relative_url),
            prefixes: entry.prefixes.iter().map(|p| p.name.clone()).collect(),
            created_by: entry.author.clone(),
            created: entry.created,
            reply_count: entry.reply_count as i64,
            view_count: entry.view_count as i64,
            body: content.body,
            html: content.html,
            pinned: entry.pinned,
        };
        db::insert_post_with_files(self.db.pool(), &new_post, &files).await?;

        if scraper_config.print_posts_scraped {
            println!("scraped: {}", entry.title);
        }
        if let Some(hook) = &self.post_created_hook {
            hook(&native_id);
        }
        info!(
            native_id,
            title = %entry.title,
            files = files.len(),
            "Archived new post"
        );
        Ok(())
    }

    /// Resolve one embedded URL into zero-error file rows: resolved entries
    /// become uploaded rows, every failure becomes an unknown row.
    async fn resolve_to_files(&self, url: &str) -> Vec<NewFile> {
        if self.registry.find_host(url).is_none() {
            // Side log of URLs no adapter claims, for future adapter work.
            if let Err(e) = append_log_line(&self.unhandled_url_log_path, url) {
                warn!("Could not record unhandled url: {e:#}");
            }
        }

        match resolver::resolve(&self.ctx, &self.registry, url).await {
            Resolution::Resolved(resolved) => {
                let mut rows = Vec::with_capacity(resolved.len());
                for file in resolved {
                    match self.upload_resolved(url, &file).await {
                        Ok(row) => rows.push(row),
                        Err(e) => {
                            // Pool exhaustion halts this upload, not the post.
                            warn!(url, file = %file.file_name, "Upload failed: {e:#}");
                            rows.push(NewFile::unknown(url, &format!("{e:#}"), &format!("{e:?}")));
                        }
                    }
                }
                rows
            }
            Resolution::Unknown(unknown) => {
                vec![NewFile::unknown(url, &unknown.error, &unknown.trace)]
            }
        }
    }

    async fn upload_resolved(&self, url: &str, file: &ResolvedFile) -> Result<NewFile> {
        // A resolved file always has bytes; an empty stream is a failed
        // resolution, not an archivable file.
        if file.bytes.is_empty() {
            anyhow::bail!("'{}' from '{url}' resolved to an empty byte stream", file.file_name);
        }
        let (account_id, object_id) = self.storage.upload(&file.file_name, &file.bytes).await?;
        Ok(NewFile {
            url: url.to_string(),
            download_url: file.download_url.clone(),
            file_name: file.file_name.clone(),
            file_size: file.bytes.len() as i64,
            hosting_service: file.hosting_service.to_string(),
            storage_account_id: account_id,
            storage_object_id: object_id,
            cover: extract_cover(&file.bytes),
            unknown: false,
            error_message: None,
            error_trace: None,
        })
    }

    /// Insert catalog rows for prefixes we have not seen before, with colors
    /// recovered from the site stylesheet.
    async fn catalog_prefixes(&mut self, prefixes: &[PrefixRef]) -> Result<()> {
        for label in prefixes {
            if db::get_prefix_by_name(self.db.pool(), &label.name)
                .await?
                .is_some()
            {
                continue;
            }
            let Some(prefix_id) = prefix::parse_prefix_id(&label.href) else {
                warn!(name = %label.name, href = %label.href, "Prefix link has no prefix_id");
                continue;
            };
            let colors = match self.stylesheet().await {
                Ok(css) => prefix::parse_prefix_colors(&css, &label.classes),
                Err(e) => {
                    warn!("Could not fetch prefix stylesheet: {e:#}");
                    PrefixColors::default()
                }
            };
            db::insert_prefix(
                self.db.pool(),
                &NewPrefix {
                    prefix_id: prefix_id as i64,
                    name: label.name.clone(),
                    text_color: colors.text_color,
                    bg_color: colors.bg_color,
                },
            )
            .await?;
            info!(name = %label.name, prefix_id, "Cataloged new prefix");
        }
        Ok(())
    }

    /// Fetch and cache the notice stylesheet (one static-asset fetch per run).
    async fn stylesheet(&mut self) -> Result<String> {
        if let Some(css) = &self.stylesheet_css {
            return Ok(css.clone());
        }
        let base_page = self.session.get_text("/").await?;
        let href = prefix::stylesheet_href(&base_page).ok_or_else(|| {
            crate::error::ArchiverError::parse("forum page", "no notice stylesheet link")
        })?;
        let css = self.session.get_text(&href).await?;
        self.stylesheet_css = Some(css.clone());
        Ok(css)
    }

    /// Re-resolve unknown files still under the retry cap. A success fills
    /// in the resolved fields without touching the counter; a failure bumps
    /// the counter.
    async fn retry_unknown_files(&self, scraper_config: &ScraperConfig) -> Result<()> {
        let candidates =
            db::unknown_files_for_retry(self.db.pool(), scraper_config.max_retries).await?;
        if candidates.is_empty() {
            return Ok(());
        }
        info!(count = candidates.len(), "Retrying unknown files");

        for file in candidates {
            match resolver::resolve(&self.ctx, &self.registry, &file.url).await {
                Resolution::Resolved(resolved) => {
                    // A folder URL may now resolve to several files; the row
                    // tracks the first, matching its one-row-per-URL origin.
                    let Some(first) = resolved.into_iter().next() else {
                        db::bump_file_retry(
                            self.db.pool(),
                            file.id,
                            "resolved to an empty file list",
                            "",
                        )
                        .await?;
                        continue;
                    };
                    match self.upload_resolved(&file.url, &first).await {
                        Ok(row) => {
                            db::mark_file_resolved(
                                self.db.pool(),
                                file.id,
                                &FileResolution {
                                    download_url: row.download_url,
                                    file_name: row.file_name,
                                    file_size: row.file_size,
                                    hosting_service: row.hosting_service,
                                    storage_account_id: row.storage_account_id,
                                    storage_object_id: row.storage_object_id,
                                    cover: row.cover,
                                },
                            )
                            .await?;
                            info!(url = %file.url, "Previously unknown file resolved");
                        }
                        Err(e) => {
                            db::bump_file_retry(
                                self.db.pool(),
                                file.id,
                                &format!("{e:#}"),
                                &format!("{e:?}"),
                            )
                            .await?;
                        }
                    }
                }
                Resolution::Unknown(unknown) => {
                    db::bump_file_retry(self.db.pool(), file.id, &unknown.error, &unknown.trace)
                        .await?;
                }
            }
        }
        Ok(())
    }

    fn deletion_sweep_due(&self, scraper_config: &ScraperConfig) -> bool {
        let interval = Duration::from_secs(scraper_config.check_deleted_interval * 60);
        self.last_deleted_sweep
            .is_none_or(|last| last.elapsed() >= interval)
    }

    /// Probe the most recent posts for deletion. The flag is monotonic: a
    /// post observed deleted stays deleted even if the URL later resolves.
    async fn sweep_deleted_posts(&mut self, scraper_config: &ScraperConfig) -> Result<()> {
        self.last_deleted_sweep = Some(Instant::now());
        let posts = db::recent_posts(self.db.pool(), scraper_config.check_deleted_depth).await?;
        debug!(count = posts.len(), "Sweeping recent posts for deletion");

        for post in posts {
            match self.session.probe_status(&post.url).await {
                Ok(404 | 410) => {
                    db::mark_post_deleted(self.db.pool(), &post.native_id).await?;
                    info!(native_id = %post.native_id, title = %post.title, "Post deleted upstream");
                }
                Ok(_) => {}
                Err(e) => {
                    // Network flakiness is not deletion evidence.
                    debug!(native_id = %post.native_id, "Deletion probe failed: {e:#}");
                }
            }
        }
        Ok(())
    }

    fn apply_log_level(&mut self, level: &str) {
        if level == self.applied_log_level {
            return;
        }
        if let Some(handle) = &self.log_handle {
            match handle.reload(EnvFilter::new(level)) {
                Ok(()) => info!(level, "Log level updated from scraper config"),
                Err(e) => {
                    warn!("Could not update log level: {e}");
                    return;
                }
            }
        }
        self.applied_log_level = level.to_string();
    }

    fn record_failure(&self, context: &str, err: &anyhow::Error) {
        let message = format!("{context}: {err:#}");
        let trace = format!("{err:?}");
        if let Err(log_err) = append_log_line(&self.critical_log_path, &format!("{message}\n{trace}"))
        {
            warn!("Could not append to critical log: {log_err:#}");
        }
        if let Err(status_err) = ScraperStatus::record_error(&self.status_path, &message, &trace) {
            warn!("Could not record error in status: {status_err:#}");
        }
    }
}

fn listing_update(section: &Section, entry: &ListingEntry) -> ListingUpdate {
    ListingUpdate {
        section_id: section.id,
        title: entry.title.clone(),
        prefixes: entry.prefixes.iter().map(|p| p.name.clone()).collect(),
        created_by: entry.author.clone(),
        reply_count: entry.reply_count as i64,
        view_count: entry.view_count as i64,
        pinned: entry.pinned,
    }
}
