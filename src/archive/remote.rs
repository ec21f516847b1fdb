//! Remote archive storage.
//!
//! Proxies sealed archives to S3-compatible object storage through the
//! storage CLI. Upload and download are idempotent overwrites keyed by
//! bucket/prefix/key. No remote retention here; bucket lifecycle policies
//! own that.

use crate::cluster::runner::CommandRunner;
use crate::error::{DrError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Addressing triple for one archive in object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLocation {
    pub bucket: String,
    pub prefix: String,
    pub key: String,
}

impl RemoteLocation {
    pub fn new(bucket: &str, prefix: &str, key: &str) -> Self {
        RemoteLocation {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    pub fn uri(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}/{}", self.bucket, self.key)
        } else {
            format!("s3://{}/{}/{}", self.bucket, self.prefix, self.key)
        }
    }
}

impl std::fmt::Display for RemoteLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.uri())
    }
}

pub struct ObjectStore {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ObjectStore {
    pub fn new(runner: Arc<dyn CommandRunner>, transfer_timeout_secs: u64) -> Self {
        ObjectStore {
            runner,
            timeout: Duration::from_secs(transfer_timeout_secs),
        }
    }

    pub async fn upload(&self, local: &Path, location: &RemoteLocation) -> Result<()> {
        let source = local.to_string_lossy().into_owned();
        let uri = location.uri();
        info!(%uri, "uploading archive");
        let out = self
            .runner
            .run("aws", &["s3", "cp", &source, &uri], self.timeout)
            .await?;
        if !out.success() {
            return Err(DrError::ArchiveFailed(format!(
                "upload to {uri} failed: {}",
                out.failure_reason()
            )));
        }
        Ok(())
    }

    pub async fn download(&self, location: &RemoteLocation, local: &Path) -> Result<()> {
        let dest = local.to_string_lossy().into_owned();
        let uri = location.uri();
        info!(%uri, "downloading archive");
        let out = self
            .runner
            .run("aws", &["s3", "cp", &uri, &dest], self.timeout)
            .await?;
        if !out.success() {
            return Err(DrError::ArchiveFailed(format!(
                "download of {uri} failed: {}",
                out.failure_reason()
            )));
        }
        Ok(())
    }

    /// Archive keys present under a bucket/prefix.
    pub async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let uri = format!("s3://{}/{}/", bucket, prefix.trim_matches('/'));
        let out = self
            .runner
            .run("aws", &["s3", "ls", &uri], self.timeout)
            .await?;
        if !out.success() {
            return Err(DrError::ArchiveFailed(format!(
                "listing {uri} failed: {}",
                out.failure_reason()
            )));
        }
        Ok(parse_listing(&out.stdout))
    }
}

/// Last column of each `s3 ls` line is the key.
fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .filter(|key| key.ends_with(".tar.zst"))
        .map(str::to_string)
        .collect()
}
