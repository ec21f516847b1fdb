//! Restore orchestration.
//!
//! Reverses a backup: confirmation gate, workload shutdown, per-store load
//! in a fixed order, volume restore, workload restart. No irreversible
//! store mutation may happen before the operator has confirmed intent (or
//! passed an explicit force flag), and none before application writers are
//! scaled down.

use crate::archive::manifest::Manifest;
use crate::archive::remote::{ObjectStore, RemoteLocation};
use crate::archive::extract;
use crate::backup::ComponentResult;
use crate::cluster::runner::CommandRunner;
use crate::cluster::{check_tooling, ClusterCtl, AWS, HELM, KUBECTL};
use crate::config::Config;
use crate::error::{DrError, Result};
use crate::stores::{adapters, Component, StoreCtx};
use crate::volumes::VolumeTransfer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exact phrase the operator must type for a non-forced restore. A plain
/// yes/no is too easy to reflex through for an irreversible operation.
pub const CONFIRM_PHRASE: &str = "destroy and restore";

/// Remote key alias resolving to the newest archive under the prefix.
pub const LATEST_KEY: &str = "latest";

/// States of one restore run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    AwaitingConfirmation,
    Fetching,
    Extracting,
    ScalingDown,
    RestoringStores,
    RestoringVolumes,
    ScalingUp,
    Done,
    Cancelled,
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RestorePhase::AwaitingConfirmation => "awaiting-confirmation",
            RestorePhase::Fetching => "fetching",
            RestorePhase::Extracting => "extracting",
            RestorePhase::ScalingDown => "scaling-down",
            RestorePhase::RestoringStores => "restoring-stores",
            RestorePhase::RestoringVolumes => "restoring-volumes",
            RestorePhase::ScalingUp => "scaling-up",
            RestorePhase::Done => "done",
            RestorePhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Where the archive to restore from lives.
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    Local(PathBuf),
    /// Key within the configured remote bucket/prefix.
    Remote(String),
}

impl ArchiveSource {
    fn describe(&self) -> String {
        match self {
            ArchiveSource::Local(path) => path.display().to_string(),
            ArchiveSource::Remote(key) => format!("remote archive '{key}'"),
        }
    }
}

/// Per-component restore enablement. Each kind can be excluded
/// independently by the operator.
#[derive(Debug, Clone, Copy)]
pub struct RestoreSelection {
    pub postgresql: bool,
    pub neo4j: bool,
    pub redis: bool,
    pub volumes: bool,
}

impl Default for RestoreSelection {
    fn default() -> Self {
        RestoreSelection {
            postgresql: true,
            neo4j: true,
            redis: true,
            volumes: true,
        }
    }
}

impl RestoreSelection {
    fn enabled(&self, component: Component) -> bool {
        match component {
            Component::Postgresql => self.postgresql,
            Component::Neo4j => self.neo4j,
            Component::Redis => self.redis,
            Component::Volumes => self.volumes,
            Component::ClusterResources => false,
        }
    }
}

/// Final state of a restore run.
#[derive(Debug)]
pub struct RestoreOutcome {
    pub phase: RestorePhase,
    pub results: Vec<ComponentResult>,
}

impl RestoreOutcome {
    pub fn cancelled() -> Self {
        RestoreOutcome {
            phase: RestorePhase::Cancelled,
            results: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == RestorePhase::Cancelled
    }
}

/// Reads one line from the operator in response to a prompt.
pub type ConfirmFn<'a> = &'a (dyn Fn(&str) -> std::io::Result<String> + Send + Sync);

pub struct RestoreOrchestrator {
    config: Config,
    cluster: ClusterCtl,
    store: Option<ObjectStore>,
    runner: Arc<dyn CommandRunner>,
    cancel: CancellationToken,
}

impl RestoreOrchestrator {
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>, cancel: CancellationToken) -> Self {
        let cluster = ClusterCtl::new(
            Arc::clone(&runner),
            &config.cluster.namespace,
            config.cluster.exec_timeout_secs,
            config.cluster.copy_timeout_secs,
        );
        let store = config
            .remote
            .bucket
            .as_ref()
            .map(|_| ObjectStore::new(Arc::clone(&runner), config.remote.transfer_timeout_secs));
        RestoreOrchestrator {
            config,
            cluster,
            store,
            runner,
            cancel,
        }
    }

    fn checkpoint(&self, phase: RestorePhase) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DrError::Cancelled);
        }
        info!(%phase, "entering phase");
        Ok(())
    }

    pub async fn run(
        &self,
        source: ArchiveSource,
        selection: RestoreSelection,
        force: bool,
        confirm: ConfirmFn<'_>,
    ) -> Result<RestoreOutcome> {
        let mut required = vec![KUBECTL, HELM];
        if matches!(source, ArchiveSource::Remote(_)) {
            required.push(AWS);
        }
        check_tooling(self.runner.as_ref(), &required).await?;

        // ── Confirmation gate: nothing irreversible before this passes ──
        self.checkpoint(RestorePhase::AwaitingConfirmation)?;
        if force {
            warn!("force flag supplied, skipping confirmation gate");
        } else {
            let prompt = format!(
                "About to restore {} into namespace '{}'.\n\
                 This DESTROYS current relational, graph and cache data.\n\
                 Type '{CONFIRM_PHRASE}' to continue: ",
                source.describe(),
                self.config.cluster.namespace
            );
            let answer = confirm(&prompt)?;
            if answer.trim() != CONFIRM_PHRASE {
                info!("confirmation phrase did not match, cancelling restore");
                return Ok(RestoreOutcome::cancelled());
            }
        }

        // ── Fetch ──
        self.checkpoint(RestorePhase::Fetching)?;
        let archive = match &source {
            ArchiveSource::Local(path) => {
                if !path.is_file() {
                    return Err(DrError::ArchiveFailed(format!(
                        "archive {} does not exist",
                        path.display()
                    )));
                }
                path.clone()
            }
            ArchiveSource::Remote(key) => {
                let not_configured = || {
                    DrError::Config("remote restore requested but no bucket configured".to_string())
                };
                let store = self.store.as_ref().ok_or_else(not_configured)?;
                let bucket = self.config.remote.bucket.as_ref().ok_or_else(not_configured)?;
                let prefix = &self.config.remote.prefix;
                let key = if key == LATEST_KEY {
                    // Keys embed the run timestamp, so lexicographic max is
                    // the newest archive.
                    let mut keys = store.list(bucket, prefix).await?;
                    keys.sort();
                    keys.pop().ok_or_else(|| {
                        DrError::ArchiveFailed("no archives found in remote storage".to_string())
                    })?
                } else {
                    key.clone()
                };
                let location = RemoteLocation::new(bucket, prefix, &key);
                std::fs::create_dir_all(&self.config.backup.workspace_root)?;
                let local = self.config.backup.workspace_root.join(&key);
                store.download(&location, &local).await?;
                local
            }
        };

        // ── Extract and surface the manifest before destructive action ──
        self.checkpoint(RestorePhase::Extracting)?;
        // Unique per run; removed on drop, error paths included.
        std::fs::create_dir_all(&self.config.backup.workspace_root)?;
        let stage = tempfile::Builder::new()
            .prefix("restore-")
            .tempdir_in(&self.config.backup.workspace_root)?;
        let (archive_clone, stage_path) = (archive.clone(), stage.path().to_path_buf());
        let extracted = tokio::task::spawn_blocking(move || extract(&archive_clone, &stage_path))
            .await
            .map_err(|e| DrError::ArchiveFailed(format!("extraction task failed: {e}")))??;
        let manifest = Manifest::read(&extracted)?;
        info!(
            backup = %manifest.backup_name,
            version = %manifest.foundry_version,
            components = %manifest.describe_components(),
            "archive contents"
        );

        // ── Stop application writers before mutating any store ──
        self.checkpoint(RestorePhase::ScalingDown)?;
        let selector = self.config.cluster.app_selector.clone();
        self.cluster.scale_deployments(&selector, 0).await?;
        let timeout = Duration::from_secs(self.config.restore.scale_down_timeout_secs);
        match self.cluster.wait_for_scale_down(&selector, timeout).await {
            Ok(()) => {}
            Err(e @ DrError::Timeout { .. }) => {
                warn!("scale-down wait expired, proceeding: {e}");
            }
            Err(e) => return Err(e),
        }

        // ── Stores, same fixed order as capture ──
        self.checkpoint(RestorePhase::RestoringStores)?;
        let mut results = Vec::new();
        let ctx = StoreCtx {
            cluster: &self.cluster,
            dir: &extracted,
        };
        for adapter in adapters(&self.config) {
            if self.cancel.is_cancelled() {
                return Err(DrError::Cancelled);
            }
            let component = adapter.kind();
            if !selection.enabled(component) {
                info!(%component, "excluded by operator, skipping");
                results.push(ComponentResult::skipped(
                    component,
                    "excluded by operator".to_string(),
                ));
                continue;
            }
            let artifact = extracted.join(adapter.artifact_name());
            if !artifact.is_file() {
                warn!(%component, "no artifact in archive, skipping");
                results.push(ComponentResult::skipped(
                    component,
                    "no artifact in archive".to_string(),
                ));
                continue;
            }
            match adapter.load(&ctx, &artifact).await {
                Ok(()) => {
                    info!(%component, "restored");
                    let size_bytes = std::fs::metadata(&artifact).map(|m| m.len()).unwrap_or(0);
                    results.push(ComponentResult::captured(component, artifact, size_bytes, None));
                }
                Err(e) => {
                    // Partial success is still worth finishing; remaining
                    // components proceed.
                    warn!(%component, "restore failed: {e}");
                    results.push(ComponentResult::failed(component, e.to_string()));
                }
            }
        }

        // ── Volumes ──
        self.checkpoint(RestorePhase::RestoringVolumes)?;
        if selection.volumes {
            let transfer = VolumeTransfer::new(&self.cluster);
            match transfer.restore_all(&extracted.join("volumes")).await {
                Ok(summary) => {
                    results.push(ComponentResult {
                        component: Component::Volumes,
                        success: true,
                        artifact: (!summary.copied.is_empty()).then(|| extracted.join("volumes")),
                        size_bytes: summary.bytes,
                        warning: summary.warning(),
                    });
                }
                Err(e) => {
                    warn!("volume restore failed: {e}");
                    results.push(ComponentResult::failed(Component::Volumes, e.to_string()));
                }
            }
        } else {
            info!("volumes excluded by operator, skipping");
            results.push(ComponentResult::skipped(
                Component::Volumes,
                "excluded by operator".to_string(),
            ));
        }

        // ── Bring application writers back ──
        self.checkpoint(RestorePhase::ScalingUp)?;
        // Fixed replica target: original counts are not recoverable from
        // the archive.
        self.cluster
            .scale_deployments(&selector, self.config.restore.replicas)
            .await?;
        let rollout_timeout = Duration::from_secs(self.config.restore.rollout_timeout_secs);
        match self.cluster.list_deployments(&selector).await {
            Ok(deployments) => {
                for deployment in deployments {
                    if let Err(e) = self
                        .cluster
                        .wait_for_rollout(&deployment, rollout_timeout)
                        .await
                    {
                        warn!(deployment, "rollout wait failed: {e}");
                    }
                }
            }
            Err(e) => warn!("deployment listing after scale-up failed: {e}"),
        }

        self.checkpoint(RestorePhase::Done)?;
        info!(backup = %manifest.backup_name, "restore run complete");
        Ok(RestoreOutcome {
            phase: RestorePhase::Done,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::manifest::{ComponentFlags, Manifest};
    use crate::archive::seal;
    use crate::cluster::runner::testing::{Script, ScriptedRunner};
    use serde_json::json;
    use std::path::Path;

    fn pods(names: &[&str]) -> String {
        let items: Vec<serde_json::Value> = names
            .iter()
            .map(|n| json!({ "metadata": { "name": n } }))
            .collect();
        json!({ "items": items }).to_string()
    }

    fn empty_list() -> String {
        json!({ "items": [] }).to_string()
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.backup.workspace_root = root.to_path_buf();
        config.redis.settle_secs = 0;
        config
    }

    /// Seal a full archive (all three stores plus a volume) into `root`.
    fn full_archive(root: &Path) -> PathBuf {
        let workspace = root.join("foundry-backup-20250114-020000");
        std::fs::create_dir_all(workspace.join("volumes/neo4j-data")).unwrap();
        std::fs::write(workspace.join("postgresql.sql"), "-- dump").unwrap();
        std::fs::write(workspace.join("neo4j-dump.cypher"), "CREATE (:Node);").unwrap();
        std::fs::write(workspace.join("redis-dump.rdb"), "REDIS0011").unwrap();
        std::fs::write(workspace.join("volumes/neo4j-data/file"), "x").unwrap();
        Manifest {
            timestamp: "20250114-020000".to_string(),
            backup_name: "foundry-backup-20250114-020000".to_string(),
            namespace: "foundry".to_string(),
            components: ComponentFlags {
                postgresql: true,
                neo4j: true,
                redis: true,
                volumes: true,
                cluster_resources: false,
            },
            foundry_version: "2.3.1".to_string(),
        }
        .write(&workspace)
        .unwrap();
        seal(&workspace).unwrap()
    }

    fn scripted_cluster() -> ScriptedRunner {
        ScriptedRunner::new()
            .rule("-l app=postgresql", Script::Stdout(pods(&["postgresql-0"])))
            .rule("-l app=neo4j", Script::Stdout(pods(&["neo4j-0"])))
            .rule("-l app=redis", Script::Stdout(pods(&["redis-0"])))
            .rule(
                "-l app.kubernetes.io/part-of=foundry",
                Script::Stdout(empty_list()),
            )
            .rule("get pods -n foundry -o json", Script::Stdout(empty_list()))
    }

    fn deny(_prompt: &str) -> std::io::Result<String> {
        Ok("yes".to_string())
    }

    fn allow(_prompt: &str) -> std::io::Result<String> {
        Ok(CONFIRM_PHRASE.to_string())
    }

    /// Scenario: mismatched confirmation phrase. The run transitions to
    /// Cancelled and no cluster mutation happens; callers exit 0.
    #[tokio::test]
    async fn test_confirmation_mismatch_cancels_without_mutation() {
        let root = tempfile::TempDir::new().unwrap();
        let archive = full_archive(root.path());
        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner.clone(),
            CancellationToken::new(),
        );

        let outcome = orchestrator
            .run(
                ArchiveSource::Local(archive),
                RestoreSelection::default(),
                false,
                &deny,
            )
            .await
            .unwrap();

        assert!(outcome.is_cancelled());
        assert_eq!(runner.calls_matching("scale"), 0);
        assert_eq!(runner.calls_matching("exec"), 0);
        assert_eq!(runner.calls_matching(" cp "), 0);
    }

    /// Scenario: restore with graph store and volumes excluded. Only the
    /// relational and cache stores are mutated; excluded components report
    /// skipped.
    #[tokio::test]
    async fn test_selective_restore_leaves_excluded_components_untouched() {
        let root = tempfile::TempDir::new().unwrap();
        let archive = full_archive(root.path());
        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner.clone(),
            CancellationToken::new(),
        );

        let selection = RestoreSelection {
            neo4j: false,
            volumes: false,
            ..RestoreSelection::default()
        };
        let outcome = orchestrator
            .run(ArchiveSource::Local(archive), selection, true, &deny)
            .await
            .unwrap();

        assert_eq!(outcome.phase, RestorePhase::Done);
        assert!(runner.calls_matching("psql") > 0);
        assert!(runner.calls_matching("SHUTDOWN NOSAVE") > 0);
        assert_eq!(runner.calls_matching("cypher-shell"), 0);

        let by_kind = |component: Component| {
            outcome
                .results
                .iter()
                .find(|r| r.component == component)
                .unwrap()
        };
        assert!(!by_kind(Component::Neo4j).success);
        assert_eq!(
            by_kind(Component::Neo4j).warning.as_deref(),
            Some("excluded by operator")
        );
        assert!(!by_kind(Component::Volumes).success);
        assert!(by_kind(Component::Postgresql).success);
        assert!(by_kind(Component::Redis).success);
    }

    #[tokio::test]
    async fn test_scale_down_precedes_store_mutation() {
        let root = tempfile::TempDir::new().unwrap();
        let archive = full_archive(root.path());
        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner.clone(),
            CancellationToken::new(),
        );

        orchestrator
            .run(
                ArchiveSource::Local(archive),
                RestoreSelection::default(),
                false,
                &allow,
            )
            .await
            .unwrap();

        let calls = runner.calls();
        let scale_down = calls
            .iter()
            .position(|c| c.contains("scale deployment") && c.contains("--replicas=0"))
            .expect("scale-down call");
        let first_mutation = calls
            .iter()
            .position(|c| c.contains("DROP SCHEMA") || c.contains("DETACH DELETE"))
            .expect("store mutation call");
        assert!(
            scale_down < first_mutation,
            "writers must be stopped before stores are mutated"
        );
    }

    #[tokio::test]
    async fn test_missing_artifact_downgrades_to_skip() {
        let root = tempfile::TempDir::new().unwrap();
        // archive without a cache snapshot
        let workspace = root.path().join("foundry-backup-20250114-030000");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::write(workspace.join("postgresql.sql"), "-- dump").unwrap();
        Manifest {
            timestamp: "20250114-030000".to_string(),
            backup_name: "foundry-backup-20250114-030000".to_string(),
            namespace: "foundry".to_string(),
            components: ComponentFlags {
                postgresql: true,
                ..ComponentFlags::default()
            },
            foundry_version: "unknown".to_string(),
        }
        .write(&workspace)
        .unwrap();
        let archive = seal(&workspace).unwrap();

        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner.clone(),
            CancellationToken::new(),
        );

        let outcome = orchestrator
            .run(
                ArchiveSource::Local(archive),
                RestoreSelection::default(),
                true,
                &deny,
            )
            .await
            .unwrap();

        assert_eq!(outcome.phase, RestorePhase::Done);
        let redis = outcome
            .results
            .iter()
            .find(|r| r.component == Component::Redis)
            .unwrap();
        assert!(!redis.success);
        assert_eq!(redis.warning.as_deref(), Some("no artifact in archive"));
        assert_eq!(runner.calls_matching("SHUTDOWN"), 0);
    }

    /// The staged extraction directory must not linger after a failed run.
    #[tokio::test]
    async fn test_failed_restore_cleans_staged_extraction() {
        let root = tempfile::TempDir::new().unwrap();
        // archive without a manifest: extraction succeeds, reading fails
        let workspace = root.path().join("foundry-backup-20250114-040000");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::write(workspace.join("postgresql.sql"), "-- dump").unwrap();
        let archive = seal(&workspace).unwrap();

        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner,
            CancellationToken::new(),
        );

        orchestrator
            .run(
                ArchiveSource::Local(archive),
                RestoreSelection::default(),
                true,
                &deny,
            )
            .await
            .unwrap_err();

        let leftovers = std::fs::read_dir(root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("restore-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_remote_restore_without_bucket_is_config_error() {
        let root = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner,
            CancellationToken::new(),
        );

        let err = orchestrator
            .run(
                ArchiveSource::Remote("foundry-backup-20250114-020000.tar.zst".to_string()),
                RestoreSelection::default(),
                true,
                &deny,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DrError::Config(_)));
    }

    #[tokio::test]
    async fn test_latest_with_empty_remote_listing_fails() {
        let root = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(scripted_cluster().rule("s3 ls", Script::Stdout(String::new())));
        let mut config = test_config(root.path());
        config.remote.bucket = Some("dr-archives".to_string());
        let orchestrator = RestoreOrchestrator::new(config, runner, CancellationToken::new());

        let err = orchestrator
            .run(
                ArchiveSource::Remote(LATEST_KEY.to_string()),
                RestoreSelection::default(),
                true,
                &deny,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DrError::ArchiveFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_local_archive_is_structural_failure() {
        let root = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(scripted_cluster());
        let orchestrator = RestoreOrchestrator::new(
            test_config(root.path()),
            runner,
            CancellationToken::new(),
        );

        let err = orchestrator
            .run(
                ArchiveSource::Local(root.path().join("absent.tar.zst")),
                RestoreSelection::default(),
                true,
                &deny,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DrError::ArchiveFailed(_)));
        assert!(err.is_structural());
    }
}
