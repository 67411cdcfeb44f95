use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Posts: one row per scraped thread. `native_id` carries the schema
    // version prefix; `deleted` is monotonic and rows are never removed.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            native_id TEXT UNIQUE NOT NULL,
            section_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            prefixes TEXT NOT NULL DEFAULT '[]',
            created_by TEXT NOT NULL,
            created INTEGER NOT NULL,
            reply_count INTEGER NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            body TEXT NOT NULL,
            html TEXT NOT NULL,
            pinned INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            first_scraped TEXT NOT NULL DEFAULT (datetime('now')),
            last_updated TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    // Files: owned by a post via its native id. Storage identifiers are
    // empty exactly while `unknown` is set.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_native_id TEXT NOT NULL,
            url TEXT NOT NULL,
            download_url TEXT NOT NULL DEFAULT '',
            file_name TEXT NOT NULL DEFAULT '',
            file_size INTEGER NOT NULL DEFAULT 0,
            hosting_service TEXT NOT NULL DEFAULT '',
            storage_account_id TEXT NOT NULL DEFAULT '',
            storage_object_id TEXT NOT NULL DEFAULT '',
            cover BLOB,
            unknown INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            error_trace TEXT,
            retries INTEGER NOT NULL DEFAULT 0,
            last_updated TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create files table")?;

    // Prefixes: global catalog, unique by display name.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS prefixes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prefix_id INTEGER NOT NULL,
            name TEXT UNIQUE NOT NULL,
            text_color TEXT,
            bg_color TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create prefixes table")?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_posts_native_id ON posts(native_id)",
        "CREATE INDEX IF NOT EXISTS idx_posts_section_pinned ON posts(section_id, pinned)",
        "CREATE INDEX IF NOT EXISTS idx_posts_created ON posts(created)",
        "CREATE INDEX IF NOT EXISTS idx_files_post ON files(post_native_id)",
        "CREATE INDEX IF NOT EXISTS idx_files_unknown ON files(unknown, retries)",
    ] {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create index")?;
    }

    Ok(())
}
