use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::models::{
    File, FileResolution, ListingUpdate, NewFile, NewPost, NewPrefix, Post, Prefix,
};

// ========== Posts ==========

/// Get a post by its schema-versioned native id.
pub async fn get_post_by_native_id(pool: &SqlitePool, native_id: &str) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE native_id = ?")
        .bind(native_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post by native id")
}

/// Insert a post and all of its file rows as one transaction.
///
/// Readers never observe the post without its complete file set.
pub async fn insert_post_with_files(
    pool: &SqlitePool,
    post: &NewPost,
    files: &[NewFile],
) -> Result<i64> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query(
        r"
        INSERT INTO posts (native_id, section_id, title, url, prefixes, created_by, created,
                           reply_count, view_count, body, html, pinned)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&post.native_id)
    .bind(post.section_id)
    .bind(&post.title)
    .bind(&post.url)
    .bind(serde_json::to_string(&post.prefixes)?)
    .bind(&post.created_by)
    .bind(post.created)
    .bind(post.reply_count)
    .bind(post.view_count)
    .bind(&post.body)
    .bind(&post.html)
    .bind(post.pinned)
    .execute(&mut *tx)
    .await
    .context("Failed to insert post")?;

    for file in files {
        sqlx::query(
            r"
            INSERT INTO files (post_native_id, url, download_url, file_name, file_size,
                               hosting_service, storage_account_id, storage_object_id,
                               cover, unknown, error_message, error_trace)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&post.native_id)
        .bind(&file.url)
        .bind(&file.download_url)
        .bind(&file.file_name)
        .bind(file.file_size)
        .bind(&file.hosting_service)
        .bind(&file.storage_account_id)
        .bind(&file.storage_object_id)
        .bind(&file.cover)
        .bind(file.unknown)
        .bind(&file.error_message)
        .bind(&file.error_trace)
        .execute(&mut *tx)
        .await
        .context("Failed to insert file")?;
    }

    tx.commit().await.context("Failed to commit post ingestion")?;
    Ok(result.last_insert_rowid())
}

/// Mutate only the listing-derived fields of an existing post.
pub async fn update_post_listing(
    pool: &SqlitePool,
    native_id: &str,
    update: &ListingUpdate,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE posts
        SET section_id = ?, title = ?, prefixes = ?, created_by = ?,
            reply_count = ?, view_count = ?, pinned = ?,
            last_updated = datetime('now')
        WHERE native_id = ?
        ",
    )
    .bind(update.section_id)
    .bind(&update.title)
    .bind(serde_json::to_string(&update.prefixes)?)
    .bind(&update.created_by)
    .bind(update.reply_count)
    .bind(update.view_count)
    .bind(update.pinned)
    .bind(native_id)
    .execute(pool)
    .await
    .context("Failed to update post listing fields")?;

    Ok(())
}

/// Mark a post deleted. Monotonic: there is no way back.
pub async fn mark_post_deleted(pool: &SqlitePool, native_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE posts SET deleted = 1, last_updated = datetime('now') WHERE native_id = ?",
    )
    .bind(native_id)
    .execute(pool)
    .await
    .context("Failed to mark post deleted")?;
    Ok(())
}

/// Most recently created posts, newest first, excluding deleted ones.
pub async fn recent_posts(pool: &SqlitePool, limit: i64) -> Result<Vec<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE deleted = 0 ORDER BY created DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to fetch recent posts")
}

/// Posts in a section, optionally filtered by pinned state, newest first.
pub async fn posts_by_section(
    pool: &SqlitePool,
    section_id: i64,
    pinned: Option<bool>,
) -> Result<Vec<Post>> {
    match pinned {
        Some(pinned) => sqlx::query_as(
            "SELECT * FROM posts WHERE section_id = ? AND pinned = ? ORDER BY created DESC",
        )
        .bind(section_id)
        .bind(pinned)
        .fetch_all(pool)
        .await
        .context("Failed to fetch posts by section"),
        None => sqlx::query_as("SELECT * FROM posts WHERE section_id = ? ORDER BY created DESC")
            .bind(section_id)
            .fetch_all(pool)
            .await
            .context("Failed to fetch posts by section"),
    }
}

/// Posts ordered by engagement (replies, then views), busiest first.
pub async fn top_posts(pool: &SqlitePool, limit: i64) -> Result<Vec<Post>> {
    sqlx::query_as(
        "SELECT * FROM posts WHERE deleted = 0 ORDER BY reply_count DESC, view_count DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch top posts")
}

/// Substring search over title, author and body.
pub async fn search_posts(pool: &SqlitePool, term: &str) -> Result<Vec<Post>> {
    let pattern = format!("%{term}%");
    sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE title LIKE ? OR created_by LIKE ? OR body LIKE ?
        ORDER BY created DESC
        ",
    )
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(pool)
    .await
    .context("Failed to search posts")
}

/// Total number of post rows, deleted included.
pub async fn count_posts(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM posts")
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;
    Ok(row.get("count"))
}

// ========== Files ==========

/// All file rows belonging to a post.
pub async fn files_for_post(pool: &SqlitePool, native_id: &str) -> Result<Vec<File>> {
    sqlx::query_as("SELECT * FROM files WHERE post_native_id = ? ORDER BY id")
        .bind(native_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch files for post")
}

/// Unknown files still eligible for the retry pass.
pub async fn unknown_files_for_retry(pool: &SqlitePool, max_retries: i64) -> Result<Vec<File>> {
    sqlx::query_as("SELECT * FROM files WHERE unknown = 1 AND retries < ? ORDER BY id")
        .bind(max_retries)
        .fetch_all(pool)
        .await
        .context("Failed to fetch unknown files")
}

/// Transition an unknown file to resolved, clearing the error fields.
///
/// The retry counter is left alone: a success is not another attempt.
pub async fn mark_file_resolved(
    pool: &SqlitePool,
    file_id: i64,
    resolution: &FileResolution,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE files
        SET download_url = ?, file_name = ?, file_size = ?, hosting_service = ?,
            storage_account_id = ?, storage_object_id = ?, cover = ?,
            unknown = 0, error_message = NULL, error_trace = NULL,
            last_updated = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(&resolution.download_url)
    .bind(&resolution.file_name)
    .bind(resolution.file_size)
    .bind(&resolution.hosting_service)
    .bind(&resolution.storage_account_id)
    .bind(&resolution.storage_object_id)
    .bind(&resolution.cover)
    .bind(file_id)
    .execute(pool)
    .await
    .context("Failed to mark file resolved")?;
    Ok(())
}

/// Record one more failed retry for an unknown file.
pub async fn bump_file_retry(
    pool: &SqlitePool,
    file_id: i64,
    error_message: &str,
    error_trace: &str,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE files
        SET retries = retries + 1, error_message = ?, error_trace = ?,
            last_updated = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(error_message)
    .bind(error_trace)
    .bind(file_id)
    .execute(pool)
    .await
    .context("Failed to bump file retry count")?;
    Ok(())
}

// ========== Prefixes ==========

/// Look up a prefix catalog entry by display name.
pub async fn get_prefix_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Prefix>> {
    sqlx::query_as("SELECT * FROM prefixes WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch prefix by name")
}

/// Insert a new prefix catalog entry.
pub async fn insert_prefix(pool: &SqlitePool, prefix: &NewPrefix) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO prefixes (prefix_id, name, text_color, bg_color) VALUES (?, ?, ?, ?)",
    )
    .bind(prefix.prefix_id)
    .bind(&prefix.name)
    .bind(&prefix.text_color)
    .bind(&prefix.bg_color)
    .execute(pool)
    .await
    .context("Failed to insert prefix")?;
    Ok(result.last_insert_rowid())
}
