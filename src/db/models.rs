use serde::{Deserialize, Serialize};

/// A scraped forum thread (the starter post plus listing metadata).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    /// Schema-versioned native id, e.g. `"1.12345"`.
    pub native_id: String,
    pub section_id: i64,
    pub title: String,
    pub url: String,
    /// JSON array of prefix display names.
    pub prefixes: String,
    pub created_by: String,
    /// Thread creation time as epoch seconds (from the site's own markup).
    pub created: i64,
    pub reply_count: i64,
    pub view_count: i64,
    pub body: String,
    pub html: String,
    pub pinned: bool,
    pub deleted: bool,
    pub first_scraped: String,
    pub last_updated: String,
}

impl Post {
    /// Decode the stored prefix-name list.
    #[must_use]
    pub fn prefix_names(&self) -> Vec<String> {
        serde_json::from_str(&self.prefixes).unwrap_or_default()
    }
}

/// A file embedded in a post, possibly re-hosted on pooled storage.
///
/// `unknown == true` means resolution failed: the storage identifiers are
/// empty and the error fields say why. A resolved file always has non-empty
/// storage identifiers and a positive size.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct File {
    pub id: i64,
    pub post_native_id: String,
    /// Source URL as embedded in the post.
    pub url: String,
    pub download_url: String,
    pub file_name: String,
    pub file_size: i64,
    pub hosting_service: String,
    pub storage_account_id: String,
    pub storage_object_id: String,
    pub cover: Option<Vec<u8>>,
    pub unknown: bool,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
    pub retries: i64,
    pub last_updated: String,
}

/// A thread prefix label with colors recovered from the site stylesheet.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Prefix {
    pub id: i64,
    pub prefix_id: i64,
    pub name: String,
    pub text_color: Option<String>,
    pub bg_color: Option<String>,
}

/// Data for inserting a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub native_id: String,
    pub section_id: i64,
    pub title: String,
    pub url: String,
    pub prefixes: Vec<String>,
    pub created_by: String,
    pub created: i64,
    pub reply_count: i64,
    pub view_count: i64,
    pub body: String,
    pub html: String,
    pub pinned: bool,
}

/// Data for inserting a new file row alongside its post.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub url: String,
    pub download_url: String,
    pub file_name: String,
    pub file_size: i64,
    pub hosting_service: String,
    pub storage_account_id: String,
    pub storage_object_id: String,
    pub cover: Option<Vec<u8>>,
    pub unknown: bool,
    pub error_message: Option<String>,
    pub error_trace: Option<String>,
}

impl NewFile {
    /// A file row for a URL that failed to resolve.
    #[must_use]
    pub fn unknown(url: &str, error_message: &str, error_trace: &str) -> Self {
        Self {
            url: url.to_string(),
            download_url: String::new(),
            file_name: String::new(),
            file_size: 0,
            hosting_service: String::new(),
            storage_account_id: String::new(),
            storage_object_id: String::new(),
            cover: None,
            unknown: true,
            error_message: Some(error_message.to_string()),
            error_trace: Some(error_trace.to_string()),
        }
    }
}

/// Listing-derived fields mutated when re-sighting an existing post.
///
/// Body, html and files are deliberately absent: they are never re-derived
/// after first ingestion.
#[derive(Debug, Clone)]
pub struct ListingUpdate {
    pub section_id: i64,
    pub title: String,
    pub prefixes: Vec<String>,
    pub created_by: String,
    pub reply_count: i64,
    pub view_count: i64,
    pub pinned: bool,
}

/// Resolved fields written onto a previously unknown file by the retry pass.
#[derive(Debug, Clone)]
pub struct FileResolution {
    pub download_url: String,
    pub file_name: String,
    pub file_size: i64,
    pub hosting_service: String,
    pub storage_account_id: String,
    pub storage_object_id: String,
    pub cover: Option<Vec<u8>>,
}

/// Data for inserting a new prefix catalog entry.
#[derive(Debug, Clone)]
pub struct NewPrefix {
    pub prefix_id: i64,
    pub name: String,
    pub text_color: Option<String>,
    pub bg_color: Option<String>,
}
