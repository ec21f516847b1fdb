//! Cluster control adapter.
//!
//! Wraps the cluster control CLI behind typed calls: pod resolution by label
//! selector, in-pod exec, pod file transfer, deployment scaling and state
//! waits. All parsing of `-o json` output lives here so format drift has a
//! single blast radius.

pub mod runner;

use crate::error::{DrError, Result};
use runner::{CmdOutput, CommandRunner};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Discovery and scaling calls are quick API round-trips; they get a fixed
/// budget independent of the configurable exec/copy timeouts.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Poll interval for scale-down waits.
const SCALE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A resolved pod within the target namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where a persistent volume claim is mounted.
#[derive(Debug, Clone)]
pub struct ClaimAttachment {
    pub pod: PodRef,
    pub mount_path: String,
}

/// External executable required before a run may begin.
pub struct Tool {
    pub name: &'static str,
    pub probe_args: &'static [&'static str],
}

pub const KUBECTL: Tool = Tool {
    name: "kubectl",
    probe_args: &["version", "--client"],
};

pub const HELM: Tool = Tool {
    name: "helm",
    probe_args: &["version", "--short"],
};

pub const AWS: Tool = Tool {
    name: "aws",
    probe_args: &["--version"],
};

/// Probe each required tool; a missing executable aborts before any run
/// state is created.
pub async fn check_tooling(runner: &dyn CommandRunner, tools: &[Tool]) -> Result<()> {
    for tool in tools {
        match runner
            .run(tool.name, tool.probe_args, DISCOVERY_TIMEOUT)
            .await
        {
            Ok(_) => debug!(tool = tool.name, "tool available"),
            Err(DrError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DrError::ToolingMissing(tool.name.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub struct ClusterCtl {
    runner: Arc<dyn CommandRunner>,
    namespace: String,
    exec_timeout: Duration,
    copy_timeout: Duration,
}

impl ClusterCtl {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        namespace: &str,
        exec_timeout_secs: u64,
        copy_timeout_secs: u64,
    ) -> Self {
        ClusterCtl {
            runner,
            namespace: namespace.to_string(),
            exec_timeout: Duration::from_secs(exec_timeout_secs),
            copy_timeout: Duration::from_secs(copy_timeout_secs),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    async fn kubectl(&self, args: &[&str], timeout: Duration) -> Result<CmdOutput> {
        self.runner.run("kubectl", args, timeout).await
    }

    async fn pods_json(&self, selector: Option<&str>) -> Result<Value> {
        let mut args = vec!["get", "pods", "-n", &self.namespace, "-o", "json"];
        if let Some(sel) = selector {
            args.push("-l");
            args.push(sel);
        }
        let out = self.kubectl(&args, DISCOVERY_TIMEOUT).await?;
        if !out.success() {
            return Err(DrError::ResourceNotFound {
                kind: "pod",
                selector: selector.unwrap_or("").to_string(),
                namespace: self.namespace.clone(),
            });
        }
        Ok(serde_json::from_str(&out.stdout)?)
    }

    /// First pod matching a label selector. Deployments here run a single
    /// primary per store kind, so the first match is the instance.
    pub async fn resolve_pod(&self, selector: &str) -> Result<PodRef> {
        let json = self.pods_json(Some(selector)).await?;
        first_pod_name(&json)
            .map(|name| PodRef { name })
            .ok_or_else(|| DrError::ResourceNotFound {
                kind: "pod",
                selector: selector.to_string(),
                namespace: self.namespace.clone(),
            })
    }

    /// Run a command inside a pod's primary container. A non-zero exit is
    /// returned in the output, not raised; callers decide severity.
    pub async fn exec_in_pod(&self, pod: &PodRef, command: &[&str]) -> Result<CmdOutput> {
        let mut args = vec!["exec", "-n", &self.namespace, pod.name.as_str(), "--"];
        args.extend_from_slice(command);
        self.kubectl(&args, self.exec_timeout).await
    }

    /// Like [`exec_in_pod`] but streams stdout to a local file, for query
    /// exports too large to buffer.
    pub async fn exec_in_pod_to_file(
        &self,
        pod: &PodRef,
        command: &[&str],
        local: &Path,
    ) -> Result<CmdOutput> {
        let mut args = vec!["exec", "-n", &self.namespace, pod.name.as_str(), "--"];
        args.extend_from_slice(command);
        self.runner
            .run_to_file("kubectl", &args, local, self.exec_timeout)
            .await
    }

    pub async fn copy_from_pod(&self, pod: &PodRef, remote: &str, local: &Path) -> Result<()> {
        let source = format!("{}/{}:{}", self.namespace, pod.name, remote);
        let dest = local.to_string_lossy().into_owned();
        let out = self
            .kubectl(&["cp", &source, &dest], self.copy_timeout)
            .await?;
        if !out.success() {
            return Err(DrError::CaptureFailed {
                component: pod.name.clone(),
                reason: format!("copy from {remote} failed: {}", out.failure_reason()),
            });
        }
        Ok(())
    }

    pub async fn copy_to_pod(&self, local: &Path, pod: &PodRef, remote: &str) -> Result<()> {
        let source = local.to_string_lossy().into_owned();
        let dest = format!("{}/{}:{}", self.namespace, pod.name, remote);
        let out = self
            .kubectl(&["cp", &source, &dest], self.copy_timeout)
            .await?;
        if !out.success() {
            return Err(DrError::RestoreFailed {
                component: pod.name.clone(),
                reason: format!("copy to {remote} failed: {}", out.failure_reason()),
            });
        }
        Ok(())
    }

    /// Scale every deployment matching the selector to the given replica
    /// count.
    pub async fn scale_deployments(&self, selector: &str, replicas: u32) -> Result<()> {
        let replicas_arg = format!("--replicas={replicas}");
        let out = self
            .kubectl(
                &[
                    "scale",
                    "deployment",
                    "-n",
                    &self.namespace,
                    "-l",
                    selector,
                    &replicas_arg,
                ],
                DISCOVERY_TIMEOUT,
            )
            .await?;
        if !out.success() {
            warn!(selector, replicas, "scale request failed: {}", out.failure_reason());
        }
        Ok(())
    }

    /// Block until no pods match the selector, or the timeout elapses.
    pub async fn wait_for_scale_down(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let json = self.pods_json(Some(selector)).await?;
            let remaining = pod_names(&json).len();
            if remaining == 0 {
                info!(selector, "all matching pods terminated");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DrError::Timeout {
                    operation: format!("scale-down of '{selector}'"),
                    seconds: timeout.as_secs(),
                });
            }
            debug!(selector, remaining, "waiting for pods to terminate");
            tokio::time::sleep(SCALE_POLL_INTERVAL).await;
        }
    }

    /// Wait for a deployment rollout to finish.
    pub async fn wait_for_rollout(&self, deployment: &str, timeout: Duration) -> Result<()> {
        let target = format!("deployment/{deployment}");
        let timeout_arg = format!("--timeout={}s", timeout.as_secs());
        let out = self
            .kubectl(
                &[
                    "rollout",
                    "status",
                    &target,
                    "-n",
                    &self.namespace,
                    &timeout_arg,
                ],
                timeout + DISCOVERY_TIMEOUT,
            )
            .await?;
        if !out.success() {
            return Err(DrError::Timeout {
                operation: format!("rollout of {deployment}"),
                seconds: timeout.as_secs(),
            });
        }
        Ok(())
    }

    /// Names of deployments matching a selector.
    pub async fn list_deployments(&self, selector: &str) -> Result<Vec<String>> {
        let out = self
            .kubectl(
                &[
                    "get",
                    "deployments",
                    "-n",
                    &self.namespace,
                    "-l",
                    selector,
                    "-o",
                    "json",
                ],
                DISCOVERY_TIMEOUT,
            )
            .await?;
        if !out.success() {
            return Ok(Vec::new());
        }
        let json: Value = serde_json::from_str(&out.stdout)?;
        Ok(pod_names(&json))
    }

    /// Names of all persistent volume claims in the namespace.
    pub async fn list_claims(&self) -> Result<Vec<String>> {
        let out = self
            .kubectl(
                &["get", "pvc", "-n", &self.namespace, "-o", "json"],
                DISCOVERY_TIMEOUT,
            )
            .await?;
        if !out.success() {
            return Ok(Vec::new());
        }
        let json: Value = serde_json::from_str(&out.stdout)?;
        Ok(pod_names(&json))
    }

    /// Resolve which pod mounts a claim, and where. `None` when no live pod
    /// references the claim or the mount path cannot be determined.
    pub async fn claim_attachment(&self, claim: &str) -> Result<Option<ClaimAttachment>> {
        let pods = self.pods_json(None).await?;
        Ok(find_claim_attachment(&pods, claim).map(|(pod, mount_path)| ClaimAttachment {
            pod: PodRef { name: pod },
            mount_path,
        }))
    }

    /// Export raw cluster resources as YAML, one file per kind. Per-kind
    /// failures are collected as warnings rather than aborting.
    pub async fn export_resources(&self, kinds: &[&str], dir: &Path) -> Result<Vec<String>> {
        std::fs::create_dir_all(dir)?;
        let mut warnings = Vec::new();
        for kind in kinds {
            let path = dir.join(format!("{kind}.yaml"));
            let result = self
                .runner
                .run_to_file(
                    "kubectl",
                    &["get", kind, "-n", &self.namespace, "-o", "yaml"],
                    &path,
                    DISCOVERY_TIMEOUT,
                )
                .await;
            match result {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    warnings.push(format!("{kind}: {}", out.failure_reason()));
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    warnings.push(format!("{kind}: {e}"));
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(warnings)
    }
}

// ── JSON parsing helpers ──

fn pod_names(list: &Value) -> Vec<String> {
    list["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["metadata"]["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn first_pod_name(list: &Value) -> Option<String> {
    pod_names(list).into_iter().next()
}

/// Walk pod specs to find which pod references a claim and where the
/// matching volume is mounted.
fn find_claim_attachment(pods: &Value, claim: &str) -> Option<(String, String)> {
    let items = pods["items"].as_array()?;
    for pod in items {
        let volumes = match pod["spec"]["volumes"].as_array() {
            Some(v) => v,
            None => continue,
        };
        let volume_name = volumes.iter().find_map(|v| {
            (v["persistentVolumeClaim"]["claimName"].as_str() == Some(claim))
                .then(|| v["name"].as_str())
                .flatten()
        });
        let volume_name = match volume_name {
            Some(n) => n,
            None => continue,
        };
        let containers = pod["spec"]["containers"].as_array()?;
        for container in containers {
            if let Some(mounts) = container["volumeMounts"].as_array() {
                for mount in mounts {
                    if mount["name"].as_str() == Some(volume_name) {
                        if let (Some(pod_name), Some(path)) =
                            (pod["metadata"]["name"].as_str(), mount["mountPath"].as_str())
                        {
                            return Some((pod_name.to_string(), path.to_string()));
                        }
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::runner::testing::{Script, ScriptedRunner};
    use super::*;
    use serde_json::json;

    fn ctl(runner: ScriptedRunner) -> ClusterCtl {
        ClusterCtl::new(Arc::new(runner), "foundry", 10, 10)
    }

    fn pod_list(names: &[&str]) -> String {
        let items: Vec<Value> = names
            .iter()
            .map(|n| json!({ "metadata": { "name": n } }))
            .collect();
        json!({ "items": items }).to_string()
    }

    #[tokio::test]
    async fn test_resolve_pod_returns_first_match() {
        let runner = ScriptedRunner::new().rule(
            "get pods",
            Script::Stdout(pod_list(&["postgresql-0", "postgresql-1"])),
        );
        let ctl = ctl(runner);
        let pod = ctl.resolve_pod("app=postgresql").await.unwrap();
        assert_eq!(pod.name, "postgresql-0");
    }

    #[tokio::test]
    async fn test_resolve_pod_not_found_on_empty_list() {
        let runner = ScriptedRunner::new().rule("get pods", Script::Stdout(pod_list(&[])));
        let ctl = ctl(runner);
        let err = ctl.resolve_pod("app=neo4j").await.unwrap_err();
        assert!(matches!(err, DrError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_scale_down_completes_when_no_pods_remain() {
        let runner = ScriptedRunner::new().rule("get pods", Script::Stdout(pod_list(&[])));
        let ctl = ctl(runner);
        ctl.wait_for_scale_down("app.kubernetes.io/part-of=foundry", Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_scale_down_times_out_on_lingering_pod() {
        let runner =
            ScriptedRunner::new().rule("get pods", Script::Stdout(pod_list(&["app-7d9f"])));
        let ctl = ctl(runner);
        let err = ctl
            .wait_for_scale_down("app.kubernetes.io/part-of=foundry", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, DrError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_check_tooling_flags_missing_executable() {
        let runner = ScriptedRunner::new().rule("helm", Script::MissingTool);
        let err = check_tooling(&runner, &[KUBECTL, HELM]).await.unwrap_err();
        match err {
            DrError::ToolingMissing(tool) => assert_eq!(tool, "helm"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_find_claim_attachment_resolves_mount_path() {
        let pods = json!({
            "items": [
                {
                    "metadata": { "name": "neo4j-0" },
                    "spec": {
                        "volumes": [
                            { "name": "data", "persistentVolumeClaim": { "claimName": "neo4j-data" } }
                        ],
                        "containers": [
                            { "volumeMounts": [ { "name": "data", "mountPath": "/data" } ] }
                        ]
                    }
                }
            ]
        });
        let (pod, path) = find_claim_attachment(&pods, "neo4j-data").unwrap();
        assert_eq!(pod, "neo4j-0");
        assert_eq!(path, "/data");
    }

    #[test]
    fn test_find_claim_attachment_unreferenced_claim() {
        let pods = json!({
            "items": [
                {
                    "metadata": { "name": "redis-0" },
                    "spec": {
                        "volumes": [ { "name": "scratch", "emptyDir": {} } ],
                        "containers": [
                            { "volumeMounts": [ { "name": "scratch", "mountPath": "/tmp" } ] }
                        ]
                    }
                }
            ]
        });
        assert!(find_claim_attachment(&pods, "orphan-claim").is_none());
    }

    #[tokio::test]
    async fn test_export_resources_collects_per_kind_warnings() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .rule("get deployments", Script::Stdout("kind: List".to_string()))
            .rule(
                "get secrets",
                Script::Fail(1, "secrets is forbidden".to_string()),
            );
        let ctl = ctl(runner);
        let warnings = ctl
            .export_resources(&["deployments", "secrets"], dir.path())
            .await
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("secrets"));
        assert!(dir.path().join("deployments.yaml").exists());
        assert!(!dir.path().join("secrets.yaml").exists());
    }
}
