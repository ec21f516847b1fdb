//! Archive management: sealing, extraction and local retention.
//!
//! A sealed archive is a zstd-compressed tarball of one run workspace.
//! Sealing is atomic from the caller's perspective: either the archive
//! exists and the workspace is gone, or the workspace is left intact for
//! inspection and no archive remains. Archives are immutable once sealed.

pub mod manifest;
pub mod remote;

use crate::error::{DrError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Run/archive name prefix; retention only ever touches matching files.
pub const BACKUP_PREFIX: &str = "foundry-backup-";

/// Timestamp layout embedded in run names.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const ARCHIVE_SUFFIX: &str = ".tar.zst";
const ZSTD_LEVEL: i32 = 3;

/// Compress a run workspace into `<workspace>.tar.zst` beside it and remove
/// the uncompressed tree. Blocking; call from `spawn_blocking`.
pub fn seal(workspace: &Path) -> Result<PathBuf> {
    let name = workspace
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DrError::ArchiveFailed("workspace has no name".to_string()))?
        .to_string();
    let archive_path = workspace.with_file_name(format!("{name}{ARCHIVE_SUFFIX}"));

    if let Err(e) = build_archive(workspace, &archive_path, &name) {
        // Leave the workspace for inspection; a half-written archive is
        // useless.
        let _ = std::fs::remove_file(&archive_path);
        return Err(DrError::ArchiveFailed(format!(
            "compressing {name} failed: {e}"
        )));
    }

    std::fs::remove_dir_all(workspace).map_err(|e| {
        DrError::ArchiveFailed(format!("workspace cleanup after sealing failed: {e}"))
    })?;

    info!(archive = %archive_path.display(), "archive sealed");
    Ok(archive_path)
}

fn build_archive(workspace: &Path, archive_path: &Path, name: &str) -> std::io::Result<()> {
    let file = File::create(archive_path)?;
    let encoder = zstd::stream::write::Encoder::new(file, ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(name, workspace)?;
    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Unpack an archive into `dest` and return the extracted root directory.
/// Blocking; call from `spawn_blocking`.
pub fn extract(archive: &Path, dest: &Path) -> Result<PathBuf> {
    let name = backup_name_of(archive)?;
    std::fs::create_dir_all(dest)?;

    let file = File::open(archive)
        .map_err(|e| DrError::ArchiveFailed(format!("cannot open {}: {e}", archive.display())))?;
    let decoder = zstd::stream::read::Decoder::new(file)
        .map_err(|e| DrError::ArchiveFailed(format!("cannot read {}: {e}", archive.display())))?;
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| DrError::ArchiveFailed(format!("unpacking {} failed: {e}", archive.display())))?;

    let root = dest.join(&name);
    if !root.is_dir() {
        return Err(DrError::ArchiveFailed(format!(
            "archive did not contain expected root directory {name}"
        )));
    }
    Ok(root)
}

/// Run name encoded in an archive file name.
pub fn backup_name_of(archive: &Path) -> Result<String> {
    archive
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(ARCHIVE_SUFFIX))
        .map(str::to_string)
        .ok_or_else(|| {
            DrError::ArchiveFailed(format!(
                "{} is not a {ARCHIVE_SUFFIX} archive",
                archive.display()
            ))
        })
}

/// Delete local archives older than the threshold. Age is derived from the
/// timestamp embedded in the archive name, so touched files do not escape
/// the sweep. Remote retention is left to the storage backend's lifecycle
/// policies.
pub fn apply_retention(dir: &Path, max_age_days: u32, now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.is_dir() {
        return Ok(removed);
    }

    let cutoff = now - chrono::Duration::days(i64::from(max_age_days));
    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let stamp = match name
            .strip_prefix(BACKUP_PREFIX)
            .and_then(|rest| rest.strip_suffix(ARCHIVE_SUFFIX))
        {
            Some(s) => s,
            None => continue,
        };
        let created = match NaiveDateTime::parse_from_str(stamp, RUN_TIMESTAMP_FORMAT) {
            Ok(t) => t.and_utc(),
            Err(_) => continue,
        };
        if created < cutoff {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    info!(archive = %name, "removed expired archive");
                    removed.push(entry.path());
                }
                Err(e) => warn!(archive = %name, "retention delete failed: {e}"),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seal_then_extract_round_trip() {
        let root = tempfile::TempDir::new().unwrap();
        let workspace = root.path().join("foundry-backup-20250114-020000");
        std::fs::create_dir_all(workspace.join("volumes/neo4j-data")).unwrap();
        std::fs::write(workspace.join("postgresql.sql"), "-- dump").unwrap();
        std::fs::write(workspace.join("volumes/neo4j-data/file"), "x").unwrap();

        let archive = seal(&workspace).unwrap();
        assert!(archive.ends_with("foundry-backup-20250114-020000.tar.zst"));
        // workspace fully gone, archive present: never both, never neither
        assert!(!workspace.exists());
        assert!(archive.exists());

        let out = tempfile::TempDir::new().unwrap();
        let extracted = extract(&archive, out.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(extracted.join("postgresql.sql")).unwrap(),
            "-- dump"
        );
        assert!(extracted.join("volumes/neo4j-data/file").exists());
    }

    #[test]
    fn test_seal_missing_workspace_leaves_no_archive() {
        let root = tempfile::TempDir::new().unwrap();
        let workspace = root.path().join("foundry-backup-20250114-020000");

        let err = seal(&workspace).unwrap_err();
        assert!(matches!(err, DrError::ArchiveFailed(_)));
        assert!(!root
            .path()
            .join("foundry-backup-20250114-020000.tar.zst")
            .exists());
    }

    #[test]
    fn test_extract_rejects_foreign_file_name() {
        let err = backup_name_of(Path::new("/tmp/backup.zip")).unwrap_err();
        assert!(matches!(err, DrError::ArchiveFailed(_)));
    }

    #[test]
    fn test_retention_deletes_only_expired_archives() {
        let dir = tempfile::TempDir::new().unwrap();
        let old = dir.path().join("foundry-backup-20250101-000000.tar.zst");
        let fresh = dir.path().join("foundry-backup-20250113-000000.tar.zst");
        let unrelated = dir.path().join("notes.txt");
        std::fs::write(&old, "x").unwrap();
        std::fs::write(&fresh, "x").unwrap();
        std::fs::write(&unrelated, "x").unwrap();

        let now = Utc.with_ymd_and_hms(2025, 1, 14, 12, 0, 0).unwrap();
        let removed = apply_retention(dir.path(), 7, now).unwrap();

        assert_eq!(removed.len(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_retention_on_missing_dir_is_noop() {
        let dir = tempfile::TempDir::new().unwrap();
        let removed =
            apply_retention(&dir.path().join("absent"), 7, Utc::now()).unwrap();
        assert!(removed.is_empty());
    }
}
