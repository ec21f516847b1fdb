//! Release-manager wrapper.
//!
//! The orchestrator never templates charts itself; it drives the release
//! manager CLI for install / deploy / uninstall and reads the deployed
//! release's version for the backup manifest (best-effort).

use crate::cluster::runner::CommandRunner;
use crate::config::ReleaseConfig;
use crate::error::{DrError, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct ReleaseManager {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
    config: ReleaseConfig,
}

impl ReleaseManager {
    pub fn new(runner: Arc<dyn CommandRunner>, namespace: &str, config: ReleaseConfig) -> Self {
        ReleaseManager {
            runner,
            namespace: namespace.to_string(),
            config,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Deployed app version of the configured release, when determinable.
    pub async fn version(&self) -> Option<String> {
        let out = self
            .runner
            .run(
                "helm",
                &["list", "-n", &self.namespace, "-o", "json"],
                self.timeout(),
            )
            .await
            .ok()?;
        if !out.success() {
            warn!("release list failed: {}", out.failure_reason());
            return None;
        }
        release_version(&serde_json::from_str(&out.stdout).ok()?, &self.config.name)
    }

    pub async fn install(&self, values: Option<&Path>) -> Result<()> {
        let mut args = vec![
            "install",
            self.config.name.as_str(),
            self.config.chart.as_str(),
            "-n",
            &self.namespace,
            "--create-namespace",
        ];
        let values_str;
        if let Some(path) = values {
            values_str = path.to_string_lossy().into_owned();
            args.push("--values");
            args.push(&values_str);
        }
        self.run_release_op("install", &args).await
    }

    /// Upgrade the release in place, installing it if absent, and wait for
    /// the rollout to settle.
    pub async fn deploy(&self, values: Option<&Path>) -> Result<()> {
        let timeout_arg = format!("{}s", self.config.timeout_secs);
        let mut args = vec![
            "upgrade",
            "--install",
            self.config.name.as_str(),
            self.config.chart.as_str(),
            "-n",
            &self.namespace,
            "--wait",
            "--timeout",
            &timeout_arg,
        ];
        let values_str;
        if let Some(path) = values {
            values_str = path.to_string_lossy().into_owned();
            args.push("--values");
            args.push(&values_str);
        }
        self.run_release_op("deploy", &args).await
    }

    pub async fn uninstall(&self) -> Result<()> {
        let args = vec!["uninstall", self.config.name.as_str(), "-n", &self.namespace];
        self.run_release_op("uninstall", &args).await
    }

    async fn run_release_op(&self, op: &str, args: &[&str]) -> Result<()> {
        info!(release = %self.config.name, namespace = %self.namespace, "{op} requested");
        let out = self.runner.run("helm", args, self.timeout()).await?;
        if !out.success() {
            return Err(DrError::Config(format!(
                "release {op} failed: {}",
                out.failure_reason()
            )));
        }
        info!(release = %self.config.name, "{op} complete");
        Ok(())
    }
}

fn release_version(releases: &Value, name: &str) -> Option<String> {
    releases.as_array()?.iter().find_map(|release| {
        (release["name"].as_str() == Some(name))
            .then(|| release["app_version"].as_str())
            .flatten()
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}
