//! Command execution on the guest.

use std::process::Stdio;

use async_trait::async_trait;
use devvm_driver::{Machine, SshTarget};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{HostError, Result};

/// Runs commands inside a machine.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on the guest and return its stdout.
    async fn run_command(&self, machine: &Machine, command: &str) -> Result<String>;

    /// Attach the caller's terminal to an interactive shell on the guest.
    async fn shell(&self, machine: &Machine, args: &[String]) -> Result<()>;
}

/// Executor using the OpenSSH client binary.
///
/// Machines on the `none` driver are the host itself, so their commands run
/// through the local shell instead.
pub struct SshExecutor {
    ssh_binary: String,
}

impl SshExecutor {
    pub fn new() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
        }
    }

    /// Use a specific ssh client binary.
    pub fn with_binary(ssh_binary: impl Into<String>) -> Self {
        Self {
            ssh_binary: ssh_binary.into(),
        }
    }

    async fn command_for(&self, machine: &Machine, remote_args: &[String]) -> Result<Command> {
        if machine.kind().is_none() {
            let mut cmd = Command::new("sh");
            if !remote_args.is_empty() {
                cmd.arg("-c").arg(remote_args.join(" "));
            }
            return Ok(cmd);
        }

        let target = machine
            .driver
            .ssh_target()
            .await
            .map_err(HostError::driver("resolving ssh target"))?;

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(ssh_args(&target)).args(remote_args);
        Ok(cmd)
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// OpenSSH client arguments for a non-interactive, host-key-agnostic session.
pub fn ssh_args(target: &SshTarget) -> Vec<String> {
    let mut args: Vec<String> = [
        "-F", "/dev/null",
        "-o", "ConnectionAttempts=3",
        "-o", "ConnectTimeout=10",
        "-o", "ControlMaster=no",
        "-o", "ControlPath=none",
        "-o", "LogLevel=quiet",
        "-o", "PasswordAuthentication=no",
        "-o", "ServerAliveInterval=60",
        "-o", "StrictHostKeyChecking=no",
        "-o", "UserKnownHostsFile=/dev/null",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if let Some(key) = &target.key_path {
        args.push("-o".to_string());
        args.push("IdentitiesOnly=yes".to_string());
        args.push("-i".to_string());
        args.push(key.to_string_lossy().into_owned());
    }

    args.push("-p".to_string());
    args.push(target.port.to_string());
    args.push(format!("{}@{}", target.user, target.host));
    args
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self, machine), fields(machine = %machine.name()))]
    async fn run_command(&self, machine: &Machine, command: &str) -> Result<String> {
        debug!(command = %command, "Running guest command");

        let output = self
            .command_for(machine, &[command.to_string()])
            .await?
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| HostError::Remote {
                machine: machine.name().to_string(),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HostError::Remote {
                machine: machine.name().to_string(),
                message: format!("{} ({}): {}{}", command.trim(), output.status, stdout, stderr),
            });
        }

        Ok(stdout)
    }

    #[instrument(skip(self, machine), fields(machine = %machine.name()))]
    async fn shell(&self, machine: &Machine, args: &[String]) -> Result<()> {
        let status = self
            .command_for(machine, args)
            .await?
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| HostError::Remote {
                machine: machine.name().to_string(),
                message: e.to_string(),
            })?;

        if !status.success() {
            return Err(HostError::Remote {
                machine: machine.name().to_string(),
                message: format!("shell exited with {}", status),
            });
        }
        Ok(())
    }
}
