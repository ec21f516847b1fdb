//! foundry-dr - disaster recovery CLI for foundry clusters.
//!
//! Wraps kubectl/helm/aws to capture and restore the relational, graph and
//! cache stores of a foundry deployment, plus persistent volume contents.

use anyhow::Result;
use clap::{Parser, Subcommand};
use foundry_dr::backup::{BackupOrchestrator, BackupReport};
use foundry_dr::cluster::runner::ToolRunner;
use foundry_dr::release::ReleaseManager;
use foundry_dr::restore::{
    ArchiveSource, RestoreOrchestrator, RestoreOutcome, RestoreSelection,
};
use foundry_dr::{utils, Config};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target namespace (overrides config)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture all stores and volumes into a sealed archive
    Backup {
        /// Directory for workspaces and finished archives (overrides config)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Upload the archive to this bucket (overrides config)
        #[arg(long)]
        bucket: Option<String>,

        /// Key prefix within the bucket
        #[arg(long)]
        prefix: Option<String>,

        /// Delete local archives older than this many days
        #[arg(long)]
        retention_days: Option<u32>,
    },
    /// Replace cluster state from a previously captured archive
    Restore {
        /// Local archive path, or an object key with --from-remote
        /// ("latest" picks the newest remote archive)
        archive: String,

        /// Fetch the archive from the configured bucket
        #[arg(long)]
        from_remote: bool,

        /// Skip the interactive confirmation gate
        #[arg(long)]
        force: bool,

        /// Leave the relational store untouched
        #[arg(long)]
        no_postgresql: bool,

        /// Leave the graph store untouched
        #[arg(long)]
        no_neo4j: bool,

        /// Leave the cache untouched
        #[arg(long)]
        no_redis: bool,

        /// Leave persistent volume contents untouched
        #[arg(long)]
        no_volumes: bool,
    },
    /// Install the foundry chart into the target namespace
    Install {
        /// Helm values file
        #[arg(long)]
        values: Option<PathBuf>,
    },
    /// Upgrade (or install) the foundry release and wait for rollout
    Deploy {
        /// Helm values file
        #[arg(long)]
        values: Option<PathBuf>,
    },
    /// Remove the foundry release
    Uninstall,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    if let Some(namespace) = &args.namespace {
        config.cluster.namespace = namespace.clone();
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "starting foundry-dr v{} (namespace: {})",
        env!("CARGO_PKG_VERSION"),
        config.cluster.namespace
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at next phase boundary");
            ctrl_c_cancel.cancel();
        }
    });

    let runner = Arc::new(ToolRunner::new());

    match args.command {
        Command::Backup {
            workspace,
            bucket,
            prefix,
            retention_days,
        } => {
            if let Some(workspace) = workspace {
                config.backup.workspace_root = workspace;
            }
            if let Some(bucket) = bucket {
                config.remote.bucket = Some(bucket);
            }
            if let Some(prefix) = prefix {
                config.remote.prefix = prefix;
            }
            if let Some(days) = retention_days {
                config.backup.retention_days = days;
            }
            let orchestrator = BackupOrchestrator::new(config, runner, cancel);
            let report = orchestrator.run().await?;
            print_backup_report(&report);
        }
        Command::Restore {
            archive,
            from_remote,
            force,
            no_postgresql,
            no_neo4j,
            no_redis,
            no_volumes,
        } => {
            let source = if from_remote {
                ArchiveSource::Remote(archive)
            } else {
                ArchiveSource::Local(PathBuf::from(archive))
            };
            let selection = RestoreSelection {
                postgresql: !no_postgresql,
                neo4j: !no_neo4j,
                redis: !no_redis,
                volumes: !no_volumes,
            };
            let orchestrator = RestoreOrchestrator::new(config, runner, cancel);
            let outcome = orchestrator
                .run(source, selection, force, &prompt_operator)
                .await?;
            print_restore_outcome(&outcome);
        }
        Command::Install { values } => {
            let release =
                ReleaseManager::new(runner, &config.cluster.namespace, config.release.clone());
            release.install(values.as_deref()).await?;
            println!("release '{}' installed", config.release.name);
        }
        Command::Deploy { values } => {
            let release =
                ReleaseManager::new(runner, &config.cluster.namespace, config.release.clone());
            release.deploy(values.as_deref()).await?;
            println!("release '{}' deployed", config.release.name);
        }
        Command::Uninstall => {
            let release =
                ReleaseManager::new(runner, &config.cluster.namespace, config.release.clone());
            release.uninstall().await?;
            println!("release '{}' removed", config.release.name);
        }
    }

    Ok(())
}

/// Blocking stdin prompt for the restore confirmation gate.
fn prompt_operator(prompt: &str) -> std::io::Result<String> {
    let mut stderr = std::io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer)
}

fn print_backup_report(report: &BackupReport) {
    println!("backup {} complete", report.run.name);
    for result in &report.run.results {
        println!("  {}", result.summary_line());
    }
    println!("  archive: {}", report.archive.display());
    if report.uploaded {
        println!("  uploaded to remote storage");
    }
    if report.swept_archives > 0 {
        println!("  swept {} expired local archive(s)", report.swept_archives);
    }
    for (component, warning) in report.run.warnings() {
        eprintln!("warning [{component}]: {warning}");
    }
}

fn print_restore_outcome(outcome: &RestoreOutcome) {
    if outcome.is_cancelled() {
        // Declined confirmation is a clean no-op, not a failure.
        println!("restore cancelled, cluster untouched");
        return;
    }
    println!("restore complete");
    for result in &outcome.results {
        println!("  {}", result.summary_line());
    }
    for result in &outcome.results {
        if let Some(warning) = &result.warning {
            eprintln!("warning [{}]: {warning}", result.component);
        }
    }
}
