//! Guest provisioning: container engine configuration and auth setup.

use std::sync::Arc;

use async_trait::async_trait;
use devvm_driver::{AuthOptions, EngineOptions, Machine, SwarmOptions};
use tracing::{debug, info, instrument, warn};

use crate::error::{HostError, Result};
use crate::lifecycle::DOCKER_DAEMON_PORT;
use crate::remote::RemoteExecutor;

/// Guest OS families with a systemd-managed docker engine.
const SUPPORTED_OS_IDS: &[&str] = &["buildroot", "boot2docker", "ubuntu", "debian", "centos", "fedora"];

/// Drop-in unit that overrides the engine's command line and environment.
const ENGINE_DROP_IN: &str = "/etc/systemd/system/docker.service.d/10-machine.conf";

/// Directory holding engine TLS material on the guest.
const GUEST_CERT_DIR: &str = "/etc/docker";

/// Applies host options to a guest OS.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Name of the guest OS this provisioner handles.
    fn name(&self) -> &str;

    /// Apply engine configuration to the guest. Safe to repeat.
    async fn provision(
        &self,
        machine: &Machine,
        swarm: &SwarmOptions,
        auth: &AuthOptions,
        engine: &EngineOptions,
    ) -> Result<()>;
}

/// Provisioner detection and auth configuration.
#[async_trait]
pub trait Provisioning: Send + Sync {
    /// Pick the provisioner matching the machine's guest OS.
    async fn detect_provisioner(&self, machine: &Machine) -> Result<Box<dyn Provisioner>>;

    /// Configure engine authentication on the guest.
    async fn configure_auth(&self, machine: &Machine) -> Result<()>;
}

/// Provisioning over a [`RemoteExecutor`].
pub struct SshProvisioning {
    remote: Arc<dyn RemoteExecutor>,
}

impl SshProvisioning {
    pub fn new(remote: Arc<dyn RemoteExecutor>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl Provisioning for SshProvisioning {
    #[instrument(skip(self, machine), fields(machine = %machine.name()))]
    async fn detect_provisioner(&self, machine: &Machine) -> Result<Box<dyn Provisioner>> {
        let os_release = self.remote.run_command(machine, "cat /etc/os-release").await?;
        let os_id = parse_os_id(&os_release)
            .ok_or_else(|| HostError::Provision("no ID in /etc/os-release".to_string()))?;

        if !SUPPORTED_OS_IDS.contains(&os_id.as_str()) {
            return Err(HostError::Provision(format!("unsupported guest OS {:?}", os_id)));
        }

        info!(os = %os_id, "Detected guest OS");
        Ok(Box::new(EngineProvisioner {
            os_id,
            remote: self.remote.clone(),
        }))
    }

    /// Prepares the engine certificate directories on both ends and checks
    /// that the guest accepts commands. Certificate generation is left to
    /// the image.
    #[instrument(skip(self, machine), fields(machine = %machine.name()))]
    async fn configure_auth(&self, machine: &Machine) -> Result<()> {
        let auth = &machine.record.host_options.auth;
        if let Some(certs) = auth.ca_cert_path.parent() {
            tokio::fs::create_dir_all(certs).await.map_err(|e| {
                HostError::Provision(format!("creating {}: {}", certs.display(), e))
            })?;
        }

        self.remote
            .run_command(machine, &format!("sudo mkdir -p {}", GUEST_CERT_DIR))
            .await?;

        debug!("Auth configured");
        Ok(())
    }
}

/// Provisioner for systemd guests running docker.
pub struct EngineProvisioner {
    os_id: String,
    remote: Arc<dyn RemoteExecutor>,
}

#[async_trait]
impl Provisioner for EngineProvisioner {
    fn name(&self) -> &str {
        &self.os_id
    }

    #[instrument(skip_all, fields(machine = %machine.name(), os = %self.os_id))]
    async fn provision(
        &self,
        machine: &Machine,
        swarm: &SwarmOptions,
        _auth: &AuthOptions,
        engine: &EngineOptions,
    ) -> Result<()> {
        if swarm.is_swarm {
            warn!("Swarm options are ignored");
        }

        let unit = engine_unit(engine);
        let command = format!(
            "sudo mkdir -p $(dirname {path}) && printf '%s' '{unit}' | sudo tee {path} >/dev/null \
             && sudo systemctl daemon-reload && sudo systemctl restart docker",
            path = ENGINE_DROP_IN,
            unit = shell_quote_body(&unit),
        );

        self.remote.run_command(machine, &command).await?;
        info!(env = engine.env.len(), "Engine provisioned");
        Ok(())
    }
}

/// Render the systemd drop-in for `engine`.
pub fn engine_unit(engine: &EngineOptions) -> String {
    let mut exec = vec![
        "/usr/bin/dockerd".to_string(),
        format!("-H tcp://0.0.0.0:{}", DOCKER_DAEMON_PORT),
        "-H unix:///var/run/docker.sock".to_string(),
    ];

    if engine.tls_verify {
        exec.push(format!(
            "--tlsverify --tlscacert {dir}/ca.pem --tlscert {dir}/server.pem --tlskey {dir}/server-key.pem",
            dir = GUEST_CERT_DIR
        ));
    }
    if !engine.storage_driver.is_empty() {
        exec.push(format!("--storage-driver {}", engine.storage_driver));
    }
    exec.extend(engine.insecure_registry.iter().map(|r| format!("--insecure-registry {}", r)));
    exec.extend(engine.registry_mirror.iter().map(|m| format!("--registry-mirror {}", m)));
    exec.extend(engine.arbitrary_flags.iter().map(|f| format!("--{}", f)));

    let mut unit = String::from("[Service]\n");
    for env in &engine.env {
        unit.push_str(&format!("Environment=\"{}\"\n", systemd_quote_body(env)));
    }
    unit.push_str("ExecStart=\n");
    unit.push_str(&format!("ExecStart={}\n", exec.join(" ")));
    unit
}

/// Escape a value for use inside a double-quoted systemd assignment.
fn systemd_quote_body(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', r#"\""#)
}

fn shell_quote_body(s: &str) -> String {
    s.replace('\'', r"'\''")
}

fn parse_os_id(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|id| id.trim().trim_matches('"').to_string())
        .filter(|id| !id.is_empty())
}
