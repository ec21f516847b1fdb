//! Data store adapters.
//!
//! One adapter per store kind. Each knows how to produce a local dump file
//! from the live instance and how to load one back, including kind-specific
//! fallback strategies. Adapters never decide run policy; orchestrators
//! downgrade their errors into per-component results.

pub mod neo4j;
pub mod postgres;
pub mod redis;

use crate::cluster::ClusterCtl;
use crate::config::Config;
use crate::error::{DrError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Component categories tracked per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Postgresql,
    Neo4j,
    Redis,
    Volumes,
    ClusterResources,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Postgresql => "postgresql",
            Component::Neo4j => "neo4j",
            Component::Redis => "redis",
            Component::Volumes => "volumes",
            Component::ClusterResources => "cluster_resources",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single captured dump/snapshot file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Capture outcome: the artifact plus an optional warning (e.g. a fallback
/// strategy was used).
#[derive(Debug)]
pub struct Capture {
    pub artifact: Artifact,
    pub warning: Option<String>,
}

/// Shared context handed to every adapter call.
pub struct StoreCtx<'a> {
    pub cluster: &'a ClusterCtl,
    /// Run workspace (capture) or extracted archive root (load).
    pub dir: &'a Path,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    fn kind(&self) -> Component;

    /// Label selector locating the store's primary pod.
    fn selector(&self) -> &str;

    /// File name of this store's artifact inside workspace and archive.
    fn artifact_name(&self) -> &'static str;

    /// Produce a local dump from the live instance.
    async fn capture(&self, ctx: &StoreCtx<'_>) -> Result<Capture>;

    /// Load a previously captured dump into the live instance. Irreversible
    /// for the relational and graph stores (drop/delete before replay).
    async fn load(&self, ctx: &StoreCtx<'_>, artifact: &Path) -> Result<()>;
}

/// Adapters in fixed capture/restore priority order.
pub fn adapters(config: &Config) -> Vec<Box<dyn StoreAdapter>> {
    vec![
        Box::new(postgres::PostgresAdapter::new(config.postgresql.clone())),
        Box::new(neo4j::Neo4jAdapter::new(config.neo4j.clone())),
        Box::new(redis::RedisAdapter::new(config.redis.clone())),
    ]
}

/// Validate a freshly captured artifact: it must exist and be non-empty to
/// count as a success.
pub(crate) fn finalize_artifact(component: Component, path: &Path) -> Result<Artifact> {
    let size_bytes = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => {
            return Err(DrError::CaptureFailed {
                component: component.to_string(),
                reason: "capture produced no artifact".to_string(),
            });
        }
    };
    if size_bytes == 0 {
        return Err(DrError::CaptureFailed {
            component: component.to_string(),
            reason: "capture produced an empty artifact".to_string(),
        });
    }
    Ok(Artifact {
        path: path.to_path_buf(),
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_priority_order_is_fixed() {
        let config = Config::default();
        let kinds: Vec<Component> = adapters(&config).iter().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![Component::Postgresql, Component::Neo4j, Component::Redis]
        );
    }

    #[test]
    fn test_finalize_artifact_rejects_empty_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("postgresql.sql");

        let err = finalize_artifact(Component::Postgresql, &path).unwrap_err();
        assert!(matches!(err, DrError::CaptureFailed { .. }));

        std::fs::write(&path, b"").unwrap();
        let err = finalize_artifact(Component::Postgresql, &path).unwrap_err();
        assert!(matches!(err, DrError::CaptureFailed { .. }));

        std::fs::write(&path, b"-- dump").unwrap();
        let artifact = finalize_artifact(Component::Postgresql, &path).unwrap();
        assert_eq!(artifact.size_bytes, 7);
    }
}
