//! Persistent volume transfer.
//!
//! Maps each persistent volume claim to its mounting pod and mount path,
//! then mirrors the directory tree to or from the run workspace. Volumes
//! are best-effort: a claim that cannot be resolved is skipped with a
//! warning and never blocks the run.

use crate::cluster::ClusterCtl;
use crate::error::Result;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

pub struct VolumeTransfer<'a> {
    cluster: &'a ClusterCtl,
}

/// Outcome of one capture or restore pass over the namespace's claims.
#[derive(Debug, Default)]
pub struct VolumeSummary {
    pub copied: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub bytes: u64,
}

impl VolumeSummary {
    pub fn warning(&self) -> Option<String> {
        if self.skipped.is_empty() {
            return None;
        }
        let details: Vec<String> = self
            .skipped
            .iter()
            .map(|(claim, reason)| format!("{claim}: {reason}"))
            .collect();
        Some(format!("skipped claims: {}", details.join("; ")))
    }
}

impl<'a> VolumeTransfer<'a> {
    pub fn new(cluster: &'a ClusterCtl) -> Self {
        VolumeTransfer { cluster }
    }

    /// Copy every resolvable claim's mount path into `dest/<claim>/`.
    pub async fn capture_all(&self, dest: &Path) -> Result<VolumeSummary> {
        std::fs::create_dir_all(dest)?;
        let mut summary = VolumeSummary::default();

        for claim in self.cluster.list_claims().await? {
            let attachment = match self.cluster.claim_attachment(&claim).await? {
                Some(a) => a,
                None => {
                    warn!(claim, "no pod mounts this claim, skipping");
                    summary
                        .skipped
                        .push((claim, "no mounting pod resolved".to_string()));
                    continue;
                }
            };

            let local = dest.join(&claim);
            info!(claim, pod = %attachment.pod, path = %attachment.mount_path, "capturing volume");
            match self
                .cluster
                .copy_from_pod(&attachment.pod, &attachment.mount_path, &local)
                .await
            {
                Ok(()) => {
                    summary.bytes += dir_size(&local);
                    summary.copied.push(claim);
                }
                Err(e) => {
                    warn!(claim, "volume copy failed: {e}");
                    summary.skipped.push((claim, e.to_string()));
                }
            }
        }

        Ok(summary)
    }

    /// Copy each `src/<claim>/` subdirectory back into the claim's mount
    /// path. Claims present in the archive but absent from the cluster are
    /// skipped.
    pub async fn restore_all(&self, src: &Path) -> Result<VolumeSummary> {
        let mut summary = VolumeSummary::default();
        if !src.is_dir() {
            return Ok(summary);
        }

        let mut entries: Vec<_> = std::fs::read_dir(src)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let claim = entry.file_name().to_string_lossy().into_owned();
            let attachment = match self.cluster.claim_attachment(&claim).await? {
                Some(a) => a,
                None => {
                    warn!(claim, "no pod mounts this claim, skipping");
                    summary
                        .skipped
                        .push((claim, "no mounting pod resolved".to_string()));
                    continue;
                }
            };

            info!(claim, pod = %attachment.pod, path = %attachment.mount_path, "restoring volume");
            match self
                .cluster
                .copy_to_pod(&entry.path(), &attachment.pod, &attachment.mount_path)
                .await
            {
                Ok(()) => {
                    summary.bytes += dir_size(&entry.path());
                    summary.copied.push(claim);
                }
                Err(e) => {
                    warn!(claim, "volume restore failed: {e}");
                    summary.skipped.push((claim, e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}

/// Total size of all files under a directory.
pub(crate) fn dir_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
