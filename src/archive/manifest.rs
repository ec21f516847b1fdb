//! Backup manifest.
//!
//! Serialized as `manifest.json` at the archive root. Written once when the
//! backup run finalizes; read-only during restore to decide what the
//! archive contains and to surface to the operator before destructive
//! action.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Version string recorded when the deployed release cannot be determined.
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Run-local identifier (timestamp string)
    pub timestamp: String,
    pub backup_name: String,
    pub namespace: String,
    pub components: ComponentFlags,
    /// Deployed release version, best-effort
    pub foundry_version: String,
}

/// Presence flag per captured component category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFlags {
    pub postgresql: bool,
    pub neo4j: bool,
    pub redis: bool,
    pub volumes: bool,
    pub cluster_resources: bool,
}

impl Manifest {
    pub fn write(&self, dir: &Path) -> crate::Result<()> {
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// One-line component summary for operator output.
    pub fn describe_components(&self) -> String {
        let flag = |present: bool| if present { "yes" } else { "no" };
        format!(
            "postgresql={} neo4j={} redis={} volumes={} cluster_resources={}",
            flag(self.components.postgresql),
            flag(self.components.neo4j),
            flag(self.components.redis),
            flag(self.components.volumes),
            flag(self.components.cluster_resources),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest {
            timestamp: "20250114-020000".to_string(),
            backup_name: "foundry-backup-20250114-020000".to_string(),
            namespace: "foundry".to_string(),
            components: ComponentFlags {
                postgresql: true,
                neo4j: false,
                redis: true,
                volumes: true,
                cluster_resources: true,
            },
            foundry_version: "2.3.1".to_string(),
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        sample().write(dir.path()).unwrap();

        let loaded = Manifest::read(dir.path()).unwrap();
        assert_eq!(loaded.backup_name, "foundry-backup-20250114-020000");
        assert!(loaded.components.postgresql);
        assert!(!loaded.components.neo4j);
        assert_eq!(loaded.foundry_version, "2.3.1");
    }

    #[test]
    fn test_flat_field_names_are_stable() {
        // The manifest is an external contract; field names must not drift.
        let json = serde_json::to_value(sample()).unwrap();
        for field in [
            "timestamp",
            "backup_name",
            "namespace",
            "components",
            "foundry_version",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["components"]["neo4j"], false);
        assert_eq!(json["components"]["cluster_resources"], true);
    }

    #[test]
    fn test_describe_components() {
        let desc = sample().describe_components();
        assert!(desc.contains("neo4j=no"));
        assert!(desc.contains("postgresql=yes"));
    }
}
