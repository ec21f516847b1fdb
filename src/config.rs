//! Configuration management for the orchestrator.
//!
//! Loads configuration from a TOML file with CLI flag overrides applied by
//! the caller. Every section is optional in the file; missing values fall
//! back to deployment defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub postgresql: PostgresConfig,
    #[serde(default)]
    pub neo4j: Neo4jConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Target namespace for every cluster operation
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Label selector matching the application workloads that must be
    /// stopped before a restore mutates any store
    #[serde(default = "default_app_selector")]
    pub app_selector: String,

    /// Timeout for a single in-pod command
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Timeout for a single pod file transfer
    #[serde(default = "default_copy_timeout")]
    pub copy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory for run workspaces and sealed archives
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Local archives older than this are deleted by the retention sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// How long to wait for application pods to terminate before store
    /// mutation begins
    #[serde(default = "default_scale_down_timeout")]
    pub scale_down_timeout_secs: u64,

    /// Per-deployment rollout wait after scale-up
    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_secs: u64,

    /// Replica count applied on scale-up. Original counts are not captured
    /// in the archive, so this is a fixed target.
    #[serde(default = "default_restore_replicas")]
    pub replicas: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Object-storage bucket; upload is skipped entirely when unset
    #[serde(default)]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    #[serde(default = "default_remote_prefix")]
    pub prefix: String,

    /// Timeout for a single upload/download
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Release name as known to the release manager
    #[serde(default = "default_release_name")]
    pub name: String,

    /// Chart reference used by install/deploy
    #[serde(default = "default_chart")]
    pub chart: String,

    /// Timeout for release-manager operations
    #[serde(default = "default_release_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_pg_selector")]
    pub selector: String,

    #[serde(default = "default_pg_user")]
    pub user: String,

    #[serde(default = "default_pg_database")]
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    #[serde(default = "default_neo4j_selector")]
    pub selector: String,

    #[serde(default = "default_neo4j_user")]
    pub user: String,

    #[serde(default = "default_neo4j_password")]
    pub password: String,

    /// Node cap for the bounded fallback export. Exports above this are
    /// truncated (documented lossy path).
    #[serde(default = "default_neo4j_export_cap")]
    pub export_node_cap: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_selector")]
    pub selector: String,

    /// Seconds to wait after BGSAVE before copying the snapshot out.
    /// The copy can race a slow save under load; accepted risk.
    #[serde(default = "default_redis_settle")]
    pub settle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_namespace() -> String {
    "foundry".to_string()
}

fn default_app_selector() -> String {
    "app.kubernetes.io/part-of=foundry".to_string()
}

fn default_exec_timeout() -> u64 {
    600
}

fn default_copy_timeout() -> u64 {
    1800
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/var/lib/foundry-dr")
}

fn default_retention_days() -> u32 {
    30
}

fn default_scale_down_timeout() -> u64 {
    300
}

fn default_rollout_timeout() -> u64 {
    300
}

fn default_restore_replicas() -> u32 {
    1
}

fn default_remote_prefix() -> String {
    "backups".to_string()
}

fn default_transfer_timeout() -> u64 {
    3600
}

fn default_release_name() -> String {
    "foundry".to_string()
}

fn default_chart() -> String {
    "foundry/foundry".to_string()
}

fn default_release_timeout() -> u64 {
    600
}

fn default_pg_selector() -> String {
    "app=postgresql".to_string()
}

fn default_pg_user() -> String {
    "postgres".to_string()
}

fn default_pg_database() -> String {
    "foundry".to_string()
}

fn default_neo4j_selector() -> String {
    "app=neo4j".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_password() -> String {
    "neo4j".to_string()
}

fn default_neo4j_export_cap() -> u64 {
    1_000_000
}

fn default_redis_selector() -> String {
    "app=redis".to_string()
}

fn default_redis_settle() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            namespace: default_namespace(),
            app_selector: default_app_selector(),
            exec_timeout_secs: default_exec_timeout(),
            copy_timeout_secs: default_copy_timeout(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            workspace_root: default_workspace_root(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        RestoreConfig {
            scale_down_timeout_secs: default_scale_down_timeout(),
            rollout_timeout_secs: default_rollout_timeout(),
            replicas: default_restore_replicas(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            bucket: None,
            prefix: default_remote_prefix(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        ReleaseConfig {
            name: default_release_name(),
            chart: default_chart(),
            timeout_secs: default_release_timeout(),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        PostgresConfig {
            selector: default_pg_selector(),
            user: default_pg_user(),
            database: default_pg_database(),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Neo4jConfig {
            selector: default_neo4j_selector(),
            user: default_neo4j_user(),
            password: default_neo4j_password(),
            export_node_cap: default_neo4j_export_cap(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            selector: default_redis_selector(),
            settle_secs: default_redis_settle(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
