use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use s3::creds::Credentials;
use s3::region::Region;
use s3::Bucket;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use super::provider::{QuotaUsage, StorageProvider};
use crate::error::ArchiverError;

/// Credential document for one S3-compatible storage account.
///
/// One JSON file per account lives in the pool's credential directory.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountCredentials {
    pub account_id: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Provider-side quota for the account, in bytes.
    pub quota_total_bytes: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// An S3-compatible bucket acting as one pooled storage account.
///
/// The bucket client is built lazily: a credential file with a bad key is a
/// configuration error only when the account is first used, not at pool
/// construction.
pub struct S3Account {
    creds: AccountCredentials,
    bucket: OnceCell<Box<Bucket>>,
}

impl S3Account {
    /// Load and validate a credential file.
    ///
    /// Validation here covers existence, parseability and the presence of an
    /// account id. Key material is checked on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparseable, or lacks an
    /// account id.
    pub fn from_credentials_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credential file {}", path.display()))?;
        let creds: AccountCredentials = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credential file {}", path.display()))?;
        if creds.account_id.is_empty() {
            return Err(ArchiverError::MissingConfiguration(format!(
                "account_id in {}",
                path.display()
            ))
            .into());
        }
        Ok(Self {
            creds,
            bucket: OnceCell::new(),
        })
    }

    async fn bucket(&self) -> Result<&Bucket> {
        self.bucket
            .get_or_try_init(|| async {
                let credentials = Credentials::new(
                    self.creds.access_key.as_deref(),
                    self.creds.secret_key.as_deref(),
                    None,
                    None,
                    None,
                )
                .with_context(|| {
                    format!("Bad credentials for account '{}'", self.creds.account_id)
                })?;

                let region = if let Some(ref endpoint) = self.creds.endpoint {
                    Region::Custom {
                        region: self.creds.region.clone(),
                        endpoint: endpoint.clone(),
                    }
                } else {
                    self.creds.region.parse().unwrap_or(Region::UsEast1)
                };

                let bucket = Bucket::new(&self.creds.bucket, region, credentials)
                    .with_context(|| {
                        format!("Failed to open bucket for account '{}'", self.creds.account_id)
                    })?;

                // Path-style for custom endpoints (MinIO, R2, etc.)
                let bucket = if self.creds.endpoint.is_some() {
                    bucket.with_path_style()
                } else {
                    bucket
                };
                Ok(bucket)
            })
            .await
            .map(AsRef::as_ref)
    }
}

#[async_trait]
impl StorageProvider for S3Account {
    fn account_id(&self) -> &str {
        &self.creds.account_id
    }

    async fn put_object(&self, name: &str, bytes: &[u8]) -> Result<String> {
        // Timestamped keys keep same-named files from different posts apart.
        let object_id = format!("{}-{}", Utc::now().timestamp_millis(), name);
        let content_type = mime_guess::from_path(name).first_or_octet_stream().to_string();

        debug!(
            account = %self.creds.account_id,
            key = %object_id,
            content_type = %content_type,
            size = bytes.len(),
            "Uploading object"
        );
        self.bucket()
            .await?
            .put_object_with_content_type(&object_id, bytes, &content_type)
            .await
            .with_context(|| format!("Failed to upload '{name}'"))?;
        Ok(object_id)
    }

    async fn fetch_object(&self, object_id: &str) -> Result<Vec<u8>> {
        let response = self
            .bucket()
            .await?
            .get_object(object_id)
            .await
            .with_context(|| format!("Failed to fetch object '{object_id}'"))?;
        Ok(response.to_vec())
    }

    async fn quota(&self) -> Result<QuotaUsage> {
        let results = self
            .bucket()
            .await?
            .list(String::new(), None)
            .await
            .context("Failed to list bucket for quota")?;
        let used: u64 = results
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| object.size)
            .sum();
        Ok(QuotaUsage {
            used,
            total: self.creds.quota_total_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_credentials_file_validation() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("a.json");
        std::fs::File::create(&good)
            .unwrap()
            .write_all(
                br#"{"account_id": "acct-a", "bucket": "pool-a", "quota_total_bytes": 1000}"#,
            )
            .unwrap();
        let account = S3Account::from_credentials_file(&good).unwrap();
        assert_eq!(account.account_id(), "acct-a");

        let missing_id = dir.path().join("b.json");
        std::fs::File::create(&missing_id)
            .unwrap()
            .write_all(br#"{"account_id": "", "bucket": "pool-b", "quota_total_bytes": 1}"#)
            .unwrap();
        assert!(S3Account::from_credentials_file(&missing_id).is_err());

        let garbage = dir.path().join("c.json");
        std::fs::File::create(&garbage).unwrap().write_all(b"not json").unwrap();
        assert!(S3Account::from_credentials_file(&garbage).is_err());

        assert!(S3Account::from_credentials_file(&dir.path().join("absent.json")).is_err());
    }
}
