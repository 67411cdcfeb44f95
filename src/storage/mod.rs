//! The storage pool: uploads spread across quota-limited remote accounts
//! with a lock-guarded on-disk quota cache and cached-quota failover.

pub mod provider;
pub mod s3;

pub use provider::{QuotaUsage, StorageProvider};
pub use s3::{AccountCredentials, S3Account};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::ArchiverError;
use crate::util::{read_locked_json, update_locked_json};

/// Accounts at or above this usage fraction are excluded from new uploads.
pub const DEFAULT_USAGE_CUTOFF: f64 = 0.975;

/// On-disk quota cache: account id to cached usage. A `BTreeMap` keeps the
/// serialized document stable across writes.
type QuotaCache = BTreeMap<String, QuotaUsage>;

/// Pool of remote storage accounts.
///
/// Enumeration order is fixed at construction; `active_account` always
/// selects the first account under the cutoff, so uploads fill accounts in
/// sequence rather than spreading evenly.
pub struct StoragePool {
    accounts: Vec<Box<dyn StorageProvider>>,
    cache_path: PathBuf,
    cutoff: f64,
}

impl StoragePool {
    /// Build a pool from already-constructed providers. Used directly by
    /// tests; production goes through [`Self::from_credentials_dir`].
    #[must_use]
    pub fn new(accounts: Vec<Box<dyn StorageProvider>>, cache_path: PathBuf, cutoff: f64) -> Self {
        Self {
            accounts,
            cache_path,
            cutoff,
        }
    }

    /// Discover accounts from a directory of per-account credential files,
    /// in stable (sorted) filename order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or any credential
    /// file fails validation.
    pub fn from_credentials_dir(dir: &Path, cache_path: PathBuf, cutoff: f64) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read credential directory {}", dir.display()))?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut accounts: Vec<Box<dyn StorageProvider>> = Vec::with_capacity(paths.len());
        for path in paths {
            let account = S3Account::from_credentials_file(&path)?;
            info!(account = account.account_id(), "Discovered storage account");
            accounts.push(Box::new(account));
        }
        Ok(Self::new(accounts, cache_path, cutoff))
    }

    /// Populate the quota cache for every account if the cache is absent.
    /// Called once at pool construction time.
    ///
    /// # Errors
    ///
    /// Returns an error if a quota query or the cache write fails.
    pub async fn ensure_cache(&self) -> Result<()> {
        let existing: Option<QuotaCache> = read_locked_json(&self.cache_path)?;
        if existing.is_some_and(|cache| !cache.is_empty()) {
            return Ok(());
        }

        let mut fresh = QuotaCache::new();
        for account in &self.accounts {
            let usage = account.quota().await.with_context(|| {
                format!("Failed to query quota for account '{}'", account.account_id())
            })?;
            fresh.insert(account.account_id().to_string(), usage);
        }
        update_locked_json(&self.cache_path, |cache: &mut QuotaCache| {
            *cache = fresh;
        })?;
        debug!(accounts = self.accounts.len(), "Primed quota cache");
        Ok(())
    }

    /// The account id new uploads currently go to.
    ///
    /// The cache is re-read on every call, so external write-throughs are
    /// observed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiverError::Storage`] with a usage breakdown when every
    /// account is at or above the cutoff.
    pub async fn active_account(&self) -> Result<String> {
        self.ensure_cache().await?;
        let cache: QuotaCache = read_locked_json(&self.cache_path)?.unwrap_or_default();

        for account in &self.accounts {
            let Some(usage) = cache.get(account.account_id()) else {
                continue;
            };
            if usage.fraction() < self.cutoff {
                return Ok(account.account_id().to_string());
            }
        }
        Err(ArchiverError::Storage(format!(
            "all storage accounts are above the {:.1}% usage cutoff:\n{}",
            self.cutoff * 100.0,
            self.breakdown().unwrap_or_default()
        ))
        .into())
    }

    /// Upload bytes to the active account.
    ///
    /// After a successful upload, only the uploaded-to account's cache entry
    /// is refreshed (write-through, not a full refresh).
    ///
    /// # Errors
    ///
    /// Returns an error if no account is under the cutoff or the upload
    /// itself fails. Failures here are fatal for this upload only.
    pub async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(String, String)> {
        let account_id = self.active_account().await?;
        let account = self
            .account(&account_id)
            .context("active account vanished from the pool")?;

        let object_id = account.put_object(name, bytes).await?;

        let usage = account.quota().await.with_context(|| {
            format!("Failed to refresh quota for account '{account_id}' after upload")
        })?;
        update_locked_json(&self.cache_path, |cache: &mut QuotaCache| {
            cache.insert(account_id.clone(), usage);
        })?;

        info!(account = %account_id, object = %object_id, size = bytes.len(), "Uploaded file");
        Ok((account_id, object_id))
    }

    /// Fetch previously uploaded bytes by `(account_id, object_id)`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown account or a failed fetch.
    pub async fn fetch(&self, account_id: &str, object_id: &str) -> Result<Vec<u8>> {
        let account = self
            .account(account_id)
            .with_context(|| format!("no storage account '{account_id}' in the pool"))?;
        account.fetch_object(object_id).await
    }

    /// Human-readable per-account usage list.
    ///
    /// # Errors
    ///
    /// Returns an error if the quota cache cannot be read.
    pub fn breakdown(&self) -> Result<String> {
        let cache: QuotaCache = read_locked_json(&self.cache_path)?.unwrap_or_default();
        let mut lines = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            let line = cache.get(account.account_id()).map_or_else(
                || format!("  {}: quota not yet cached", account.account_id()),
                |usage| {
                    format!(
                        "  {}: {:.1}% ({}/{} bytes)",
                        account.account_id(),
                        usage.fraction() * 100.0,
                        usage.used,
                        usage.total
                    )
                },
            );
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    fn account(&self, account_id: &str) -> Option<&dyn StorageProvider> {
        self.accounts
            .iter()
            .find(|account| account.account_id() == account_id)
            .map(AsRef::as_ref)
    }
}
