//! Subprocess execution for external tooling.
//!
//! Every external tool the orchestrator depends on (cluster control, release
//! manager, object-storage CLI) is invoked through the [`CommandRunner`]
//! trait so orchestration logic can be exercised against a scripted runner
//! in tests. Each call carries an explicit timeout; exceeding it yields
//! `DrError::Timeout`, which is distinct from a tool-reported failure.

use crate::error::{DrError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short failure description for component warnings.
    pub fn failure_reason(&self) -> String {
        let detail = self.stderr.trim();
        if detail.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {}", self.exit_code, detail)
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, capturing stdout and stderr.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CmdOutput>;

    /// Run a command with stdout redirected to a local file. Used for dump
    /// streams too large to buffer in memory.
    async fn run_to_file(
        &self,
        program: &str,
        args: &[&str],
        stdout_path: &Path,
        timeout: Duration,
    ) -> Result<CmdOutput>;
}

fn describe(program: &str, args: &[&str]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Real runner backed by `tokio::process`.
pub struct ToolRunner;

impl ToolRunner {
    pub fn new() -> Self {
        ToolRunner
    }

    async fn run_inner(
        &self,
        program: &str,
        args: &[&str],
        stdout: Stdio,
        timeout: Duration,
    ) -> Result<CmdOutput> {
        let line = describe(program, args);
        debug!(command = %line, "running external tool");

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DrError::Timeout {
                    operation: line,
                    seconds: timeout.as_secs(),
                });
            }
        };

        Ok(CmdOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ToolRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CmdOutput> {
        self.run_inner(program, args, Stdio::piped(), timeout).await
    }

    async fn run_to_file(
        &self,
        program: &str,
        args: &[&str],
        stdout_path: &Path,
        timeout: Duration,
    ) -> Result<CmdOutput> {
        let file = std::fs::File::create(stdout_path)?;
        self.run_inner(program, args, Stdio::from(file), timeout)
            .await
    }
}
