use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cached quota numbers for one storage account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub used: u64,
    pub total: u64,
}

impl QuotaUsage {
    /// Fraction of the quota consumed, in `0.0..=1.0` territory.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.used as f64 / self.total as f64
    }
}

/// One remote storage account the pool can upload to.
///
/// Object handles returned by `put_object` are addressable later purely by
/// `(account_id, object_id)`.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Stable identifier for this account.
    fn account_id(&self) -> &str;

    /// Create a publicly readable object holding `bytes`, returning its id.
    async fn put_object(&self, name: &str, bytes: &[u8]) -> Result<String>;

    /// Fetch a previously stored object's bytes.
    async fn fetch_object(&self, object_id: &str) -> Result<Vec<u8>>;

    /// Current used/total quota for the account.
    async fn quota(&self) -> Result<QuotaUsage>;
}
