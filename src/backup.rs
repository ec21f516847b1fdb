//! Backup orchestration.
//!
//! Drives the end-to-end capture sequence. Component failures are recorded
//! and the run proceeds; only missing tooling and archive sealing can abort
//! the whole run. A broken graph store must never prevent backing up the
//! relational store.

use crate::archive::manifest::{ComponentFlags, Manifest, UNKNOWN_VERSION};
use crate::archive::remote::{ObjectStore, RemoteLocation};
use crate::archive::{apply_retention, seal, BACKUP_PREFIX, RUN_TIMESTAMP_FORMAT};
use crate::cluster::runner::CommandRunner;
use crate::cluster::{check_tooling, ClusterCtl, AWS, HELM, KUBECTL};
use crate::config::Config;
use crate::error::{DrError, Result};
use crate::release::ReleaseManager;
use crate::stores::{adapters, Component, StoreCtx};
use crate::volumes::{dir_size, VolumeTransfer};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Resource kinds exported raw into `k8s-resources/`.
const EXPORTED_KINDS: &[&str] = &[
    "deployments",
    "services",
    "configmaps",
    "persistentvolumeclaims",
    "secrets",
];

/// States of one backup run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    Initializing,
    CapturingStores,
    CapturingVolumes,
    Manifesting,
    Sealing,
    Uploading,
    RetentionSweep,
    Done,
}

impl std::fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackupPhase::Initializing => "initializing",
            BackupPhase::CapturingStores => "capturing-stores",
            BackupPhase::CapturingVolumes => "capturing-volumes",
            BackupPhase::Manifesting => "manifesting",
            BackupPhase::Sealing => "sealing",
            BackupPhase::Uploading => "uploading",
            BackupPhase::RetentionSweep => "retention-sweep",
            BackupPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-component outcome record within a run.
#[derive(Debug, Clone)]
pub struct ComponentResult {
    pub component: Component,
    pub success: bool,
    pub artifact: Option<PathBuf>,
    pub size_bytes: u64,
    pub warning: Option<String>,
}

impl ComponentResult {
    pub fn captured(
        component: Component,
        artifact: PathBuf,
        size_bytes: u64,
        warning: Option<String>,
    ) -> Self {
        ComponentResult {
            component,
            success: true,
            artifact: Some(artifact),
            size_bytes,
            warning,
        }
    }

    pub fn skipped(component: Component, warning: String) -> Self {
        ComponentResult {
            component,
            success: false,
            artifact: None,
            size_bytes: 0,
            warning: Some(warning),
        }
    }

    pub fn failed(component: Component, warning: String) -> Self {
        ComponentResult {
            component,
            success: false,
            artifact: None,
            size_bytes: 0,
            warning: Some(warning),
        }
    }

    pub fn summary_line(&self) -> String {
        let status = if self.success { "ok" } else { "failed" };
        match &self.warning {
            Some(w) => format!("{:<18} {status} ({} bytes): {w}", self.component, self.size_bytes),
            None => format!("{:<18} {status} ({} bytes)", self.component, self.size_bytes),
        }
    }
}

/// One backup attempt: timestamp-derived identity plus per-component
/// outcomes. Immutable once the manifest is written.
#[derive(Debug)]
pub struct BackupRun {
    pub name: String,
    pub timestamp: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    pub results: Vec<ComponentResult>,
}

impl BackupRun {
    fn new(namespace: &str) -> Self {
        let started_at = Utc::now();
        let timestamp = started_at.format(RUN_TIMESTAMP_FORMAT).to_string();
        BackupRun {
            name: format!("{BACKUP_PREFIX}{timestamp}"),
            timestamp,
            namespace: namespace.to_string(),
            started_at,
            results: Vec::new(),
        }
    }

    fn result_for(&self, component: Component) -> Option<&ComponentResult> {
        self.results.iter().find(|r| r.component == component)
    }

    fn captured_with_artifact(&self, component: Component) -> bool {
        self.result_for(component)
            .map(|r| r.success && r.artifact.is_some())
            .unwrap_or(false)
    }

    /// Presence flags recorded in the manifest.
    pub fn flags(&self) -> ComponentFlags {
        ComponentFlags {
            postgresql: self.captured_with_artifact(Component::Postgresql),
            neo4j: self.captured_with_artifact(Component::Neo4j),
            redis: self.captured_with_artifact(Component::Redis),
            volumes: self.captured_with_artifact(Component::Volumes),
            cluster_resources: self.captured_with_artifact(Component::ClusterResources),
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = (&Component, &str)> {
        self.results
            .iter()
            .filter_map(|r| r.warning.as_deref().map(|w| (&r.component, w)))
    }
}

/// Final report of a completed backup run.
#[derive(Debug)]
pub struct BackupReport {
    pub run: BackupRun,
    pub archive: PathBuf,
    pub uploaded: bool,
    pub swept_archives: usize,
}

pub struct BackupOrchestrator {
    config: Config,
    cluster: ClusterCtl,
    release: ReleaseManager,
    store: Option<ObjectStore>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>, cancel: CancellationToken) -> Self {
        let cluster = ClusterCtl::new(
            Arc::clone(&runner),
            &config.cluster.namespace,
            config.cluster.exec_timeout_secs,
            config.cluster.copy_timeout_secs,
        );
        let release = ReleaseManager::new(
            Arc::clone(&runner),
            &config.cluster.namespace,
            config.release.clone(),
        );
        let store = config
            .remote
            .bucket
            .as_ref()
            .map(|_| ObjectStore::new(Arc::clone(&runner), config.remote.transfer_timeout_secs));
        BackupOrchestrator {
            config,
            cluster,
            release,
            store,
            runner,
            cancel,
        }
    }

    fn checkpoint(&self, phase: BackupPhase) -> Result<()> {
        if self.cancel.is_cancelled() {
            error!(%phase, "run cancelled; workspace left partially populated");
            return Err(DrError::Cancelled);
        }
        info!(%phase, "entering phase");
        Ok(())
    }

    pub async fn run(&self) -> Result<BackupReport> {
        self.checkpoint(BackupPhase::Initializing)?;
        let mut required = vec![KUBECTL, HELM];
        if self.store.is_some() {
            required.push(AWS);
        }
        check_tooling(self.runner.as_ref(), &required).await?;

        let mut run = BackupRun::new(&self.config.cluster.namespace);
        let workspace = self.config.backup.workspace_root.join(&run.name);
        std::fs::create_dir_all(&workspace)?;
        info!(run = %run.name, workspace = %workspace.display(), "backup run started");

        // ── Stores, fixed priority order ──
        self.checkpoint(BackupPhase::CapturingStores)?;
        let ctx = StoreCtx {
            cluster: &self.cluster,
            dir: &workspace,
        };
        for adapter in adapters(&self.config) {
            if self.cancel.is_cancelled() {
                return Err(DrError::Cancelled);
            }
            let component = adapter.kind();
            match adapter.capture(&ctx).await {
                Ok(capture) => {
                    info!(%component, bytes = capture.artifact.size_bytes, "captured");
                    run.results.push(ComponentResult::captured(
                        component,
                        capture.artifact.path,
                        capture.artifact.size_bytes,
                        capture.warning,
                    ));
                }
                Err(e @ DrError::ResourceNotFound { .. }) => {
                    warn!(%component, "store not deployed, skipping: {e}");
                    run.results.push(ComponentResult::skipped(
                        component,
                        format!("not deployed: {e}"),
                    ));
                }
                Err(e) => {
                    warn!(%component, "capture failed: {e}");
                    run.results
                        .push(ComponentResult::failed(component, e.to_string()));
                }
            }
        }

        // Raw resource exports ride along with the stores.
        let resources_dir = workspace.join("k8s-resources");
        match self
            .cluster
            .export_resources(EXPORTED_KINDS, &resources_dir)
            .await
        {
            Ok(warnings) => {
                let exported = std::fs::read_dir(&resources_dir)
                    .map(|entries| entries.filter_map(|e| e.ok()).count())
                    .unwrap_or(0);
                let warning = (!warnings.is_empty()).then(|| warnings.join("; "));
                if exported == 0 {
                    // Nothing landed on disk; the manifest flag must not
                    // claim an artifact that is not in the archive.
                    warn!("no cluster resource kinds exported");
                    run.results.push(ComponentResult::failed(
                        Component::ClusterResources,
                        warning.unwrap_or_else(|| "no resource kinds exported".to_string()),
                    ));
                } else {
                    let size_bytes = dir_size(&resources_dir);
                    run.results.push(ComponentResult::captured(
                        Component::ClusterResources,
                        resources_dir,
                        size_bytes,
                        warning,
                    ));
                }
            }
            Err(e) => {
                warn!("resource export failed: {e}");
                run.results
                    .push(ComponentResult::failed(Component::ClusterResources, e.to_string()));
            }
        }

        // ── Volumes, best-effort ──
        self.checkpoint(BackupPhase::CapturingVolumes)?;
        let volumes_dir = workspace.join("volumes");
        let transfer = VolumeTransfer::new(&self.cluster);
        match transfer.capture_all(&volumes_dir).await {
            Ok(summary) if summary.copied.is_empty() => {
                run.results.push(ComponentResult {
                    component: Component::Volumes,
                    success: true,
                    artifact: None,
                    size_bytes: 0,
                    warning: summary.warning(),
                });
            }
            Ok(summary) => {
                run.results.push(ComponentResult {
                    component: Component::Volumes,
                    success: true,
                    artifact: Some(volumes_dir),
                    size_bytes: summary.bytes,
                    warning: summary.warning(),
                });
            }
            Err(e) => {
                warn!("volume capture failed: {e}");
                run.results
                    .push(ComponentResult::failed(Component::Volumes, e.to_string()));
            }
        }

        // ── Manifest ──
        self.checkpoint(BackupPhase::Manifesting)?;
        let foundry_version = self
            .release
            .version()
            .await
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
        let manifest = Manifest {
            timestamp: run.timestamp.clone(),
            backup_name: run.name.clone(),
            namespace: run.namespace.clone(),
            components: run.flags(),
            foundry_version,
        };
        manifest.write(&workspace)?;

        // ── Seal; failure here is fatal, an unsealed backup is unusable ──
        self.checkpoint(BackupPhase::Sealing)?;
        let seal_target = workspace.clone();
        let archive = tokio::task::spawn_blocking(move || seal(&seal_target))
            .await
            .map_err(|e| DrError::ArchiveFailed(format!("sealing task failed: {e}")))??;

        // ── Upload, skipped entirely when no remote is configured ──
        self.checkpoint(BackupPhase::Uploading)?;
        let mut uploaded = false;
        if let (Some(store), Some(bucket)) = (&self.store, &self.config.remote.bucket) {
            let key = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| run.name.clone());
            let location = RemoteLocation::new(bucket, &self.config.remote.prefix, &key);
            store.upload(&archive, &location).await?;
            uploaded = true;
        } else {
            info!("no remote bucket configured, skipping upload");
        }

        // ── Retention ──
        self.checkpoint(BackupPhase::RetentionSweep)?;
        let swept = match apply_retention(
            &self.config.backup.workspace_root,
            self.config.backup.retention_days,
            Utc::now(),
        ) {
            Ok(removed) => removed.len(),
            Err(e) => {
                warn!("retention sweep failed: {e}");
                0
            }
        };

        self.checkpoint(BackupPhase::Done)?;
        info!(run = %run.name, archive = %archive.display(), "backup run complete");
        Ok(BackupReport {
            run,
            archive,
            uploaded,
            swept_archives: swept,
        })
    }
}
