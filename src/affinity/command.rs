//! Affinity updates through an external administrative command.
//!
//! The command is invoked as `<program> <args..> cluster-<cluster> <server>`;
//! the backend it talks to applies the change on its own schedule.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{AffinityError, AffinityUpdater};
use crate::types::{ClusterId, ServerId};

pub const DEFAULT_UPDATE_COMMAND: &str = "sudo -u dnsuser /usr/local/sbin/nsupdate.sh";
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CommandAffinityUpdater {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAffinityUpdater {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, timeout: DEFAULT_UPDATE_TIMEOUT }
    }

    /// Splits a command line on whitespace. Returns `None` for a blank line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, cluster: &ClusterId, server: &ServerId) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(format!("cluster-{cluster}"))
            .arg(server.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for CommandAffinityUpdater {
    fn default() -> Self {
        Self::from_command_line(DEFAULT_UPDATE_COMMAND)
            .unwrap_or_else(|| Self::new("nsupdate.sh", Vec::new()))
    }
}

#[async_trait]
impl AffinityUpdater for CommandAffinityUpdater {
    async fn apply(&self, cluster: &ClusterId, server: &ServerId) -> Result<(), AffinityError> {
        let output = tokio::time::timeout(self.timeout, self.command(cluster, server).output())
            .await
            .map_err(|_| AffinityError::Timeout {
                record: format!("cluster-{cluster}"),
                after: self.timeout,
            })?
            .map_err(|source| AffinityError::Spawn { program: self.program.clone(), source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AffinityError::Update {
                cluster: cluster.clone(),
                reason: format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        Ok(())
    }
}
