//! Relational store adapter (PostgreSQL).
//!
//! Capture is a logical dump without ownership or privilege metadata so the
//! dump replays cleanly on a differently-provisioned target. Load drops and
//! recreates the public schema before replay; loading into a non-empty
//! schema must never silently merge state.

use super::{finalize_artifact, Capture, Component, StoreAdapter, StoreCtx};
use crate::config::PostgresConfig;
use crate::error::{DrError, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

const POD_DUMP_PATH: &str = "/tmp/postgresql.sql";
const SCHEMA_RESET: &str = "DROP SCHEMA public CASCADE; CREATE SCHEMA public;";

pub struct PostgresAdapter {
    config: PostgresConfig,
}

impl PostgresAdapter {
    pub fn new(config: PostgresConfig) -> Self {
        PostgresAdapter { config }
    }
}

#[async_trait]
impl StoreAdapter for PostgresAdapter {
    fn kind(&self) -> Component {
        Component::Postgresql
    }

    fn selector(&self) -> &str {
        &self.config.selector
    }

    fn artifact_name(&self) -> &'static str {
        "postgresql.sql"
    }

    async fn capture(&self, ctx: &StoreCtx<'_>) -> Result<Capture> {
        let pod = ctx.cluster.resolve_pod(self.selector()).await?;
        info!(pod = %pod, database = %self.config.database, "dumping relational store");

        let out = ctx
            .cluster
            .exec_in_pod(
                &pod,
                &[
                    "pg_dump",
                    "-U",
                    &self.config.user,
                    "--no-owner",
                    "--no-privileges",
                    "-f",
                    POD_DUMP_PATH,
                    &self.config.database,
                ],
            )
            .await?;
        if !out.success() {
            return Err(DrError::CaptureFailed {
                component: self.kind().to_string(),
                reason: format!("pg_dump failed: {}", out.failure_reason()),
            });
        }

        let local = ctx.dir.join(self.artifact_name());
        ctx.cluster.copy_from_pod(&pod, POD_DUMP_PATH, &local).await?;

        let artifact = finalize_artifact(self.kind(), &local)?;
        Ok(Capture {
            artifact,
            warning: None,
        })
    }

    async fn load(&self, ctx: &StoreCtx<'_>, artifact: &Path) -> Result<()> {
        let pod = ctx.cluster.resolve_pod(self.selector()).await?;
        ctx.cluster.copy_to_pod(artifact, &pod, POD_DUMP_PATH).await?;

        // Destroy-and-recreate must precede replay.
        info!(pod = %pod, "resetting public schema");
        let out = ctx
            .cluster
            .exec_in_pod(
                &pod,
                &[
                    "psql",
                    "-U",
                    &self.config.user,
                    "-d",
                    &self.config.database,
                    "-c",
                    SCHEMA_RESET,
                ],
            )
            .await?;
        if !out.success() {
            return Err(DrError::RestoreFailed {
                component: self.kind().to_string(),
                reason: format!("schema reset failed: {}", out.failure_reason()),
            });
        }

        info!(pod = %pod, "replaying relational dump");
        let out = ctx
            .cluster
            .exec_in_pod(
                &pod,
                &[
                    "psql",
                    "-U",
                    &self.config.user,
                    "-d",
                    &self.config.database,
                    "-f",
                    POD_DUMP_PATH,
                ],
            )
            .await?;
        if !out.success() {
            return Err(DrError::RestoreFailed {
                component: self.kind().to_string(),
                reason: format!("dump replay failed: {}", out.failure_reason()),
            });
        }
        Ok(())
    }
}
