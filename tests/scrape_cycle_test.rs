//! End-to-end scrape cycle tests against a mock forum.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use forum_file_archiver::config::Config;
use forum_file_archiver::db::{self, Database};
use forum_file_archiver::error::ArchiverError;
use forum_file_archiver::hosts::{HostContext, HostRegistry, HostingService};
use forum_file_archiver::scraper::{
    Credentials, ForumSession, Scraper, ScraperConfig, ScraperStatus,
};
use forum_file_archiver::storage::{QuotaUsage, StoragePool, StorageProvider};
use forum_file_archiver::util::read_locked_json;

/// Adapter stub claiming every `/hosted/` URL and serving one fixed file
/// from the mock server.
struct StubHost {
    uri: String,
}

#[async_trait]
impl HostingService for StubHost {
    fn name(&self) -> &'static str {
        "StubHost"
    }

    fn base_url(&self) -> &'static str {
        "https://stub.invalid/"
    }

    fn is_host_for(&self, url: &str) -> Result<bool, ArchiverError> {
        Ok(url.contains("/hosted/"))
    }

    async fn file_names(&self, _ctx: &HostContext, _url: &str) -> Result<Vec<String>> {
        Ok(vec!["song.mp3".to_string()])
    }

    async fn download_urls(&self, _ctx: &HostContext, _url: &str) -> Result<Vec<String>> {
        Ok(vec![format!("{}/files/song.mp3", self.uri)])
    }
}

/// In-memory storage account with shared counters the test can observe.
struct MemoryAccount {
    uploads: Arc<AtomicU64>,
    used: Arc<AtomicU64>,
}

#[async_trait]
impl StorageProvider for MemoryAccount {
    fn account_id(&self) -> &str {
        "mem-a"
    }

    async fn put_object(&self, name: &str, bytes: &[u8]) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.used.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Ok(format!("obj-{name}"))
    }

    async fn fetch_object(&self, _object_id: &str) -> Result<Vec<u8>> {
        anyhow::bail!("not exercised")
    }

    async fn quota(&self) -> Result<QuotaUsage> {
        Ok(QuotaUsage {
            used: self.used.load(Ordering::SeqCst),
            total: 1 << 30,
        })
    }
}

struct Harness {
    server: MockServer,
    db: Database,
    config: Config,
    uploads: Arc<AtomicU64>,
    _temp_dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().to_path_buf();

        let config = Config {
            forum_base_url: server.uri(),
            forum_credentials_file: PathBuf::from("/dev/null"),
            database_path: data.join("archive.sqlite"),
            storage_credentials_dir: data.clone(),
            quota_cache_path: data.join("quota_cache.json"),
            usage_cutoff: 0.975,
            scraper_config_path: data.join("scraper_config.json"),
            status_path: data.join("scraper_status.json"),
            critical_log_path: data.join("critical_log.txt"),
            unhandled_url_log_path: data.join("unhandled_urls.txt"),
        };
        let db = Database::new(&config.database_path).await.unwrap();

        Self {
            server,
            db,
            config,
            uploads: Arc::new(AtomicU64::new(0)),
            _temp_dir: temp_dir,
        }
    }

    fn storage(&self) -> StoragePool {
        let account = MemoryAccount {
            uploads: Arc::clone(&self.uploads),
            used: Arc::new(AtomicU64::new(0)),
        };
        StoragePool::new(
            vec![Box::new(account)],
            self.config.quota_cache_path.clone(),
            self.config.usage_cutoff,
        )
    }

    fn registry(&self) -> HostRegistry {
        let mut registry = HostRegistry::new();
        registry.register(Box::new(StubHost {
            uri: self.server.uri(),
        }));
        registry
    }

    async fn mount_forum_base(&self) {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html data-csrf="csrf-1"><head>
                  <link rel="stylesheet" href="/css.php?css=public%3Anotices.less&s=1" />
                </head><body></body></html>"#,
            ))
            .mount(&self.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "xf_user=session-token; Path=/; Max-Age=31536000"),
            )
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/css.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(".label.label--primary{color:#fff;background-color:#2577b1}"),
            )
            .mount(&self.server)
            .await;
        // The second section stays empty in these tests.
        Mock::given(method("GET"))
            .and(path("/forums/hiphopdiscussion/page-1/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
            .mount(&self.server)
            .await;
    }

    async fn login(&self) -> ForumSession {
        let credentials = Credentials {
            username: "archiver".to_string(),
            password: "hunter2".to_string(),
            user_agent: None,
        };
        ForumSession::login(&self.config.forum_base_url, &credentials)
            .await
            .unwrap()
    }

    async fn scraper(&self) -> Scraper {
        Scraper::new(self.login().await, self.db.clone(), self.storage(), &self.config)
            .unwrap()
            .with_registry(self.registry())
    }
}

fn listing_page(site_id: u64) -> String {
    format!(
        r#"<html><body>
        <div class="structItem structItem--thread js-threadListItem-{site_id}">
          <div class="structItem-title">
            <a href="/forums/hiphopleaks/?prefix_id[0]=7" class="labelLink">
              <span class="label label--primary">Leak</span>
            </a>
            <a href="/threads/leak-song.{site_id}/">Leak Song</a>
          </div>
          <div class="structItem-minor">
            <a class="username">uploader1</a>
            <div class="structItem-startDate">
              <a href="/threads/leak-song.{site_id}/"><time data-time="1700000000"></time></a>
            </div>
          </div>
          <div class="structItem-cell structItem-cell--meta">
            <dl><dt>Replies</dt><dd>12</dd></dl>
            <dl><dt>Views</dt><dd>3.4k</dd></dl>
          </div>
        </div>
        </body></html>"#
    )
}

fn thread_page(embedded_url: &str) -> String {
    format!(
        r#"<html><body>
        <article class="message message-threadStarterPost">
          <div class="message-content">
            <div class="bbWrapper">Full song below.
              <a href="{embedded_url}">download</a>
            </div>
          </div>
        </article>
        </body></html>"#
    )
}

fn cycle_config() -> ScraperConfig {
    ScraperConfig {
        initial_pages_scraped: 1,
        subsequent_pages_scraped: 1,
        max_retries: 2,
        ..ScraperConfig::default()
    }
}

#[tokio::test]
async fn test_full_cycle_archives_new_post() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(77)))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/leak-song.77/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(thread_page(&format!(
            "{}/hosted/abc",
            harness.server.uri()
        ))))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/song.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 10240]))
        .mount(&harness.server)
        .await;

    let hook_fired = Arc::new(AtomicUsize::new(0));
    let hook_count = Arc::clone(&hook_fired);
    let mut scraper = harness.scraper().await.on_post_created(move |_native_id| {
        hook_count.fetch_add(1, Ordering::SeqCst);
    });

    let config = cycle_config();
    scraper.run_cycle(&config).await.unwrap();

    // Exactly one post, one resolved file, one upload, one notification.
    let post = db::get_post_by_native_id(harness.db.pool(), "1.77")
        .await
        .unwrap()
        .expect("post was not archived");
    assert_eq!(post.title, "Leak Song");
    assert_eq!(post.section_id, 10);
    assert_eq!(post.created, 1_700_000_000);
    assert_eq!(post.reply_count, 12);
    assert_eq!(post.view_count, 3400);
    assert!(post.body.contains("Full song below."));
    assert!(!post.html.contains("class="));

    let files = db::files_for_post(harness.db.pool(), "1.77").await.unwrap();
    assert_eq!(files.len(), 1);
    assert!(!files[0].unknown);
    assert_eq!(files[0].file_size, 10240);
    assert_eq!(files[0].file_name, "song.mp3");
    assert_eq!(files[0].hosting_service, "StubHost");
    assert_eq!(files[0].storage_account_id, "mem-a");
    assert_eq!(files[0].storage_object_id, "obj-song.mp3");

    assert_eq!(harness.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(hook_fired.load(Ordering::SeqCst), 1);

    // The prefix was cataloged with stylesheet colors.
    let prefix = db::get_prefix_by_name(harness.db.pool(), "Leak")
        .await
        .unwrap()
        .expect("prefix was not cataloged");
    assert_eq!(prefix.prefix_id, 7);
    assert_eq!(prefix.text_color.as_deref(), Some("#fff"));
    assert_eq!(prefix.bg_color.as_deref(), Some("#2577b1"));

    let status: ScraperStatus = read_locked_json(&harness.config.status_path)
        .unwrap()
        .expect("status document missing");
    assert!(status.last_scraped > 0);
    assert!(status.last_error.is_none());

    // A second cycle re-sights the thread and ingests nothing new.
    scraper.run_cycle(&config).await.unwrap();
    assert_eq!(db::count_posts(harness.db.pool()).await.unwrap(), 1);
    assert_eq!(harness.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(hook_fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unclaimed_url_becomes_bounded_unknown_file() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(88)))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/leak-song.88/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(thread_page("https://unheard-of.example/f/x")),
        )
        .mount(&harness.server)
        .await;

    let mut scraper = harness.scraper().await;
    let config = cycle_config();

    // Cycle 1: ingests the post, then the in-cycle retry pass fails once.
    scraper.run_cycle(&config).await.unwrap();
    let files = db::files_for_post(harness.db.pool(), "1.88").await.unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].unknown);
    assert!(files[0].storage_account_id.is_empty());
    assert_eq!(files[0].retries, 1);
    assert!(files[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("unheard-of.example"));
    assert_eq!(harness.uploads.load(Ordering::SeqCst), 0);

    let unhandled = std::fs::read_to_string(&harness.config.unhandled_url_log_path).unwrap();
    assert!(unhandled.contains("https://unheard-of.example/f/x"));

    // Cycle 2 bumps to the cap; cycle 3 no longer retries.
    scraper.run_cycle(&config).await.unwrap();
    scraper.run_cycle(&config).await.unwrap();
    let files = db::files_for_post(harness.db.pool(), "1.88").await.unwrap();
    assert!(files[0].unknown);
    assert_eq!(files[0].retries, 2);
}

#[tokio::test]
async fn test_listing_page_failure_is_survived_and_recorded() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;

    let mut scraper = harness.scraper().await;
    scraper.run_cycle(&cycle_config()).await.unwrap();

    assert_eq!(db::count_posts(harness.db.pool()).await.unwrap(), 0);

    let critical = std::fs::read_to_string(&harness.config.critical_log_path).unwrap();
    assert!(critical.contains("section 'hip-hop-leaks' page 1"));

    let status: ScraperStatus = read_locked_json(&harness.config.status_path)
        .unwrap()
        .expect("status document missing");
    let last_error = status.last_error.expect("page failure was not recorded");
    assert!(last_error.error.contains("hip-hop-leaks"));
    // The cycle itself still completed.
    assert!(status.last_scraped > 0);
}

#[tokio::test]
async fn test_deleted_post_detected_by_sweep() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(99)))
        .mount(&harness.server)
        .await;
    // The thread page answers the ingestion fetch, then disappears; the
    // deletion sweep's probe gets a 404.
    Mock::given(method("GET"))
        .and(path("/threads/leak-song.99/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(thread_page(&format!(
            "{}/hosted/abc",
            harness.server.uri()
        ))))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/song.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 128]))
        .mount(&harness.server)
        .await;

    let mut scraper = harness.scraper().await;
    scraper.run_cycle(&cycle_config()).await.unwrap();

    let post = db::get_post_by_native_id(harness.db.pool(), "1.99")
        .await
        .unwrap()
        .unwrap();
    assert!(post.deleted, "sweep should mark the 404ing post deleted");
}

fn updated_listing_page(site_id: u64) -> String {
    format!(
        r#"<html><body>
        <div class="structItem structItem--thread js-threadListItem-{site_id}">
          <div class="structItem-title">
            <a href="/forums/hiphopleaks/?prefix_id[0]=9" class="labelLink">
              <span class="label label--gold">Gold</span>
            </a>
            <a href="/threads/leak-song.{site_id}/">Leak Song (CDQ)</a>
          </div>
          <div class="structItem-minor">
            <a class="username">uploader1</a>
            <div class="structItem-startDate">
              <a href="/threads/leak-song.{site_id}/"><time data-time="1700000000"></time></a>
            </div>
          </div>
          <div class="structItem-cell structItem-cell--meta">
            <dl><dt>Replies</dt><dd>40</dd></dl>
            <dl><dt>Views</dt><dd>5.1k</dd></dl>
          </div>
        </div>
        </body></html>"#
    )
}

#[tokio::test]
async fn test_update_cycle_mutates_listing_fields_only_and_catalogs_new_prefix() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(77)))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/leak-song.77/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(thread_page(&format!(
            "{}/hosted/abc",
            harness.server.uri()
        ))))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/song.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
        .mount(&harness.server)
        .await;

    let mut scraper = harness.scraper().await;
    scraper.run_cycle(&cycle_config()).await.unwrap();

    let before = db::get_post_by_native_id(harness.db.pool(), "1.77")
        .await
        .unwrap()
        .expect("post was not archived");
    let files_before = db::files_for_post(harness.db.pool(), "1.77").await.unwrap();
    assert_eq!(files_before.len(), 1);

    // The thread is re-sighted with changed listing fields and a prefix the
    // catalog has never seen.
    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(updated_listing_page(77)))
        .mount(&harness.server)
        .await;

    let config = ScraperConfig {
        update_posts: true,
        ..cycle_config()
    };
    scraper.run_cycle(&config).await.unwrap();

    let after = db::get_post_by_native_id(harness.db.pool(), "1.77")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.title, "Leak Song (CDQ)");
    assert_eq!(after.reply_count, 40);
    assert_eq!(after.view_count, 5100);
    assert_eq!(after.prefix_names(), vec!["Gold".to_string()]);

    // First-ingestion content is never re-derived.
    assert_eq!(after.first_scraped, before.first_scraped);
    assert_eq!(after.body, before.body);
    assert_eq!(after.html, before.html);

    let files_after = db::files_for_post(harness.db.pool(), "1.77").await.unwrap();
    assert_eq!(files_after.len(), 1);
    assert_eq!(files_after[0].id, files_before[0].id);
    assert_eq!(files_after[0].storage_object_id, files_before[0].storage_object_id);
    assert_eq!(harness.uploads.load(Ordering::SeqCst), 1);

    // The prefix first sighted on the already-archived thread still enters
    // the global catalog.
    let prefix = db::get_prefix_by_name(harness.db.pool(), "Gold")
        .await
        .unwrap()
        .expect("prefix was not cataloged");
    assert_eq!(prefix.prefix_id, 9);
}

#[tokio::test]
async fn test_component_failure_still_advances_cycle_timestamp() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&harness.server)
        .await;

    let mut scraper = harness.scraper().await;

    // A closed pool fails the retry pass and the deletion sweep while the
    // (empty) listing sweep still succeeds.
    harness.db.pool().close().await;

    scraper.run_cycle(&cycle_config()).await.unwrap();

    let critical = std::fs::read_to_string(&harness.config.critical_log_path).unwrap();
    assert!(critical.contains("retry pass"));
    assert!(critical.contains("deletion sweep"));

    let status: ScraperStatus = read_locked_json(&harness.config.status_path)
        .unwrap()
        .expect("status document missing");
    let last_error = status.last_error.expect("component failure was not recorded");
    assert!(last_error.error.contains("deletion sweep"));
    // The cycle timestamp advances despite the failures.
    assert!(status.last_scraped > 0);
}

#[tokio::test]
async fn test_empty_resolved_download_becomes_unknown_file() {
    let harness = Harness::new().await;
    harness.mount_forum_base().await;

    Mock::given(method("GET"))
        .and(path("/forums/hiphopleaks/page-1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(66)))
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/threads/leak-song.66/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(thread_page(&format!(
            "{}/hosted/abc",
            harness.server.uri()
        ))))
        .mount(&harness.server)
        .await;
    // The host resolves the URL but serves zero bytes.
    Mock::given(method("GET"))
        .and(path("/files/song.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(Vec::<u8>::new()))
        .mount(&harness.server)
        .await;

    let mut scraper = harness.scraper().await;
    scraper.run_cycle(&cycle_config()).await.unwrap();

    let files = db::files_for_post(harness.db.pool(), "1.66").await.unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].unknown, "an empty download must not count as resolved");
    assert_eq!(files[0].file_size, 0);
    assert!(files[0].storage_account_id.is_empty());
    assert!(files[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("empty byte stream"));
    assert_eq!(harness.uploads.load(Ordering::SeqCst), 0);
}
