//! Graph store adapter (Neo4j).
//!
//! Capture tries an ordered list of export strategies: the APOC bulk export
//! first, then a bounded query export capped at a configured node count.
//! The bounded path is lossy for larger graphs and marks the component
//! result with a warning. Load detach-deletes all existing graph data
//! before replaying the statement stream.

use super::{finalize_artifact, Capture, Component, StoreAdapter, StoreCtx};
use crate::config::Neo4jConfig;
use crate::error::{DrError, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

const POD_DUMP_PATH: &str = "/tmp/neo4j-dump.cypher";
const DETACH_DELETE: &str = "MATCH (n) DETACH DELETE n;";

pub struct Neo4jAdapter {
    config: Neo4jConfig,
}

impl Neo4jAdapter {
    pub fn new(config: Neo4jConfig) -> Self {
        Neo4jAdapter { config }
    }

    async fn cypher(
        &self,
        ctx: &StoreCtx<'_>,
        pod: &crate::cluster::PodRef,
        query: &str,
    ) -> Result<crate::cluster::runner::CmdOutput> {
        ctx.cluster
            .exec_in_pod(
                pod,
                &[
                    "cypher-shell",
                    "-u",
                    &self.config.user,
                    "-p",
                    &self.config.password,
                    query,
                ],
            )
            .await
    }

    /// Preferred strategy: full node/relationship/property export through
    /// the APOC bulk-export facility.
    async fn export_apoc(
        &self,
        ctx: &StoreCtx<'_>,
        pod: &crate::cluster::PodRef,
        local: &Path,
    ) -> Result<()> {
        let query = format!(
            "CALL apoc.export.cypher.all('{POD_DUMP_PATH}', {{format: 'cypher-shell'}});"
        );
        let out = self.cypher(ctx, pod, &query).await?;
        if !out.success() {
            return Err(DrError::CaptureFailed {
                component: self.kind().to_string(),
                reason: format!("apoc export failed: {}", out.failure_reason()),
            });
        }
        ctx.cluster.copy_from_pod(pod, POD_DUMP_PATH, local).await
    }

    /// Fallback strategy: bounded query export. Hard-capped at the
    /// configured node count; graphs above the cap are truncated. The
    /// output is row data, not a statement stream, so a fallback capture
    /// cannot be replayed by [`StoreAdapter::load`].
    async fn export_bounded(
        &self,
        ctx: &StoreCtx<'_>,
        pod: &crate::cluster::PodRef,
        local: &Path,
    ) -> Result<()> {
        let query = format!(
            "MATCH (n) WITH n LIMIT {cap} \
             OPTIONAL MATCH (n)-[r]->(m) \
             RETURN n, r, m;",
            cap = self.config.export_node_cap
        );
        let out = ctx
            .cluster
            .exec_in_pod_to_file(
                pod,
                &[
                    "cypher-shell",
                    "-u",
                    &self.config.user,
                    "-p",
                    &self.config.password,
                    "--format",
                    "plain",
                    &query,
                ],
                local,
            )
            .await?;
        if !out.success() {
            return Err(DrError::CaptureFailed {
                component: self.kind().to_string(),
                reason: format!("bounded export failed: {}", out.failure_reason()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for Neo4jAdapter {
    fn kind(&self) -> Component {
        Component::Neo4j
    }

    fn selector(&self) -> &str {
        &self.config.selector
    }

    fn artifact_name(&self) -> &'static str {
        "neo4j-dump.cypher"
    }

    async fn capture(&self, ctx: &StoreCtx<'_>) -> Result<Capture> {
        let pod = ctx.cluster.resolve_pod(self.selector()).await?;
        let local = ctx.dir.join(self.artifact_name());

        info!(pod = %pod, "exporting graph store");
        let apoc_error = match self.export_apoc(ctx, &pod, &local).await {
            Ok(()) => {
                let artifact = finalize_artifact(self.kind(), &local)?;
                return Ok(Capture {
                    artifact,
                    warning: None,
                });
            }
            Err(e) => e,
        };

        warn!(pod = %pod, error = %apoc_error, "apoc export unavailable, using bounded query export");
        match self.export_bounded(ctx, &pod, &local).await {
            Ok(()) => {
                let artifact = finalize_artifact(self.kind(), &local)?;
                Ok(Capture {
                    artifact,
                    warning: Some(format!(
                        "bounded query export used (lossy above {} nodes; row output, not replayable by restore); apoc export failed: {apoc_error}",
                        self.config.export_node_cap
                    )),
                })
            }
            Err(bounded_error) => Err(DrError::CaptureFailed {
                component: self.kind().to_string(),
                reason: format!(
                    "all export strategies failed; apoc: {apoc_error}; bounded: {bounded_error}"
                ),
            }),
        }
    }

    async fn load(&self, ctx: &StoreCtx<'_>, artifact: &Path) -> Result<()> {
        let pod = ctx.cluster.resolve_pod(self.selector()).await?;
        ctx.cluster.copy_to_pod(artifact, &pod, POD_DUMP_PATH).await?;

        // Existing graph data goes first; replay into a non-empty graph
        // would duplicate nodes.
        info!(pod = %pod, "deleting existing graph data");
        let out = self.cypher(ctx, &pod, DETACH_DELETE).await?;
        if !out.success() {
            return Err(DrError::RestoreFailed {
                component: self.kind().to_string(),
                reason: format!("detach-delete failed: {}", out.failure_reason()),
            });
        }

        info!(pod = %pod, "replaying graph export");
        let out = ctx
            .cluster
            .exec_in_pod(
                &pod,
                &[
                    "cypher-shell",
                    "-u",
                    &self.config.user,
                    "-p",
                    &self.config.password,
                    "--file",
                    POD_DUMP_PATH,
                ],
            )
            .await?;
        if !out.success() {
            return Err(DrError::RestoreFailed {
                component: self.kind().to_string(),
                reason: format!("statement replay failed: {}", out.failure_reason()),
            });
        }
        Ok(())
    }
}
