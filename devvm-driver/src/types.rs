//! Type definitions for machine configuration, persisted records and state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Service CIDR that is always the first insecure registry entry.
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";

/// Machine name used when no profile is selected.
pub const DEFAULT_MACHINE_NAME: &str = "devvm";

/// Version of the persisted machine record layout.
pub const RECORD_CONFIG_VERSION: u32 = 3;

// =============================================================================
// DRIVER KIND
// =============================================================================

/// Virtualization backend a machine is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    VirtualBox,
    VmwareFusion,
    Vmware,
    Kvm,
    Kvm2,
    HyperV,
    Xhyve,
    HyperKit,
    /// Runs directly on the host, no virtualization.
    None,
}

impl DriverKind {
    /// All known driver kinds.
    pub const ALL: [DriverKind; 9] = [
        DriverKind::VirtualBox,
        DriverKind::VmwareFusion,
        DriverKind::Vmware,
        DriverKind::Kvm,
        DriverKind::Kvm2,
        DriverKind::HyperV,
        DriverKind::Xhyve,
        DriverKind::HyperKit,
        DriverKind::None,
    ];

    /// The string tag used in configuration and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::VirtualBox => "virtualbox",
            DriverKind::VmwareFusion => "vmwarefusion",
            DriverKind::Vmware => "vmware",
            DriverKind::Kvm => "kvm",
            DriverKind::Kvm2 => "kvm2",
            DriverKind::HyperV => "hyperv",
            DriverKind::Xhyve => "xhyve",
            DriverKind::HyperKit => "hyperkit",
            DriverKind::None => "none",
        }
    }

    /// True for the no-op driver, which skips images, SSH, auth and power steps.
    pub fn is_none(&self) -> bool {
        matches!(self, DriverKind::None)
    }

    /// The driver that replaces a deprecated one.
    pub fn replacement(&self) -> Option<DriverKind> {
        match self {
            DriverKind::Kvm => Some(DriverKind::Kvm2),
            DriverKind::Xhyve => Some(DriverKind::HyperKit),
            DriverKind::VmwareFusion => Some(DriverKind::Vmware),
            _ => None,
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DriverKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| DriverError::UnsupportedDriver(s.to_string()))
    }
}

// =============================================================================
// DRIVER STATE
// =============================================================================

/// Machine state as reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// No machine exists.
    None,
    Running,
    Paused,
    Saved,
    Stopped,
    Stopping,
    Starting,
    Error,
    Timeout,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::None => "None",
            DriverState::Running => "Running",
            DriverState::Paused => "Paused",
            DriverState::Saved => "Saved",
            DriverState::Stopped => "Stopped",
            DriverState::Stopping => "Stopping",
            DriverState::Starting => "Starting",
            DriverState::Error => "Error",
            DriverState::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// MACHINE CONFIGURATION
// =============================================================================

/// Desired shape of a machine, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Driver tag (e.g. "kvm2", "virtualbox", "none")
    pub vm_driver: String,
    /// Number of vCPUs
    pub cpus: u32,
    /// Memory size in MB
    pub memory_mb: u64,
    /// Disk size in MB
    pub disk_size_mb: u64,
    /// Boot ISO location
    pub iso_url: String,
    /// Registries the container engine may reach without TLS
    pub insecure_registry: Vec<String>,
    /// Registry mirrors for the container engine
    pub registry_mirror: Vec<String>,
    /// Engine environment variables (KEY=VALUE)
    pub docker_env: Vec<String>,
    /// Arbitrary engine flags
    pub docker_opt: Vec<String>,
    /// Host-only network CIDR (virtualbox)
    pub host_only_cidr: String,
    /// Virtual switch name (hyperv)
    pub hyperv_virtual_switch: String,
    /// Libvirt network name (kvm, kvm2)
    pub kvm_network: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            vm_driver: DriverKind::VirtualBox.as_str().to_string(),
            cpus: 2,
            memory_mb: 2048,
            disk_size_mb: 20000,
            iso_url: String::new(),
            insecure_registry: Vec::new(),
            registry_mirror: Vec::new(),
            docker_env: Vec::new(),
            docker_opt: Vec::new(),
            host_only_cidr: "192.168.99.1/24".to_string(),
            hyperv_virtual_switch: String::new(),
            kvm_network: "default".to_string(),
        }
    }
}

impl MachineConfig {
    /// Create a configuration for the given driver tag with default sizing.
    pub fn new(vm_driver: impl Into<String>) -> Self {
        Self {
            vm_driver: vm_driver.into(),
            ..Default::default()
        }
    }

    /// Set the number of vCPUs.
    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = cpus;
        self
    }

    /// Set the memory size in MB.
    pub fn with_memory(mut self, memory_mb: u64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    /// Set the boot ISO URL.
    pub fn with_iso_url(mut self, url: impl Into<String>) -> Self {
        self.iso_url = url.into();
        self
    }

    /// Add an insecure registry.
    pub fn with_insecure_registry(mut self, registry: impl Into<String>) -> Self {
        self.insecure_registry.push(registry.into());
        self
    }

    /// Add an engine environment variable (KEY=VALUE).
    pub fn with_docker_env(mut self, env: impl Into<String>) -> Self {
        self.docker_env.push(env.into());
        self
    }
}

// =============================================================================
// HOST OPTIONS
// =============================================================================

/// Container engine options applied to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub env: Vec<String>,
    pub insecure_registry: Vec<String>,
    pub registry_mirror: Vec<String>,
    pub arbitrary_flags: Vec<String>,
    pub tls_verify: bool,
    pub storage_driver: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            insecure_registry: Vec::new(),
            registry_mirror: Vec::new(),
            arbitrary_flags: Vec::new(),
            tls_verify: true,
            storage_driver: "overlay2".to_string(),
        }
    }
}

/// Certificate locations used when configuring engine TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    pub cert_dir: PathBuf,
    pub store_path: PathBuf,
    pub ca_cert_path: PathBuf,
    pub ca_private_key_path: PathBuf,
    pub client_cert_path: PathBuf,
    pub client_key_path: PathBuf,
    pub server_cert_path: PathBuf,
    pub server_key_path: PathBuf,
    pub server_cert_sans: Vec<String>,
}

impl AuthOptions {
    /// Point every certificate path at `dir`.
    pub fn rooted_at(dir: &Path) -> Self {
        let certs = dir.join("certs");
        Self {
            cert_dir: dir.to_path_buf(),
            store_path: dir.to_path_buf(),
            ca_cert_path: certs.join("ca.pem"),
            ca_private_key_path: certs.join("ca-key.pem"),
            client_cert_path: certs.join("cert.pem"),
            client_key_path: certs.join("key.pem"),
            server_cert_path: dir.join("machines").join("server.pem"),
            server_key_path: dir.join("machines").join("server-key.pem"),
            server_cert_sans: Vec::new(),
        }
    }
}

/// Swarm options. Carried for provisioners; devvm never enables swarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmOptions {
    pub is_swarm: bool,
    pub master: bool,
    pub discovery: String,
    pub host: String,
}

/// Connection and engine options stored with a machine record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOptions {
    pub engine: EngineOptions,
    pub auth: AuthOptions,
    pub swarm: SwarmOptions,
}

// =============================================================================
// MACHINE RECORD
// =============================================================================

/// Persisted description of one managed machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub config_version: u32,
    pub name: String,
    pub driver_name: DriverKind,
    /// Opaque driver-specific configuration
    pub raw_driver: serde_json::Value,
    #[serde(default)]
    pub host_options: HostOptions,
}

impl MachineRecord {
    /// Create a record with default host options.
    pub fn new(name: impl Into<String>, driver_name: DriverKind, raw_driver: serde_json::Value) -> Self {
        Self {
            config_version: RECORD_CONFIG_VERSION,
            name: name.into(),
            driver_name,
            raw_driver,
            host_options: HostOptions::default(),
        }
    }

    /// The raw driver configuration rendered as pretty-printed JSON.
    pub fn raw_driver_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.raw_driver).unwrap_or_default()
    }
}

/// Where a guest accepts SSH connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_kind_round_trips_through_tag() {
        for kind in DriverKind::ALL {
            assert_eq!(kind.as_str().parse::<DriverKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_unknown_driver_tag_is_unsupported() {
        let err = "qemu-magic".parse::<DriverKind>().unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedDriver(tag) if tag == "qemu-magic"));
    }

    #[test]
    fn test_deprecated_drivers_have_replacements() {
        assert_eq!(DriverKind::Kvm.replacement(), Some(DriverKind::Kvm2));
        assert_eq!(DriverKind::Xhyve.replacement(), Some(DriverKind::HyperKit));
        assert_eq!(DriverKind::VmwareFusion.replacement(), Some(DriverKind::Vmware));
        assert_eq!(DriverKind::Kvm2.replacement(), None);
    }

    #[test]
    fn test_state_text() {
        assert_eq!(DriverState::None.to_string(), "None");
        assert_eq!(DriverState::Running.to_string(), "Running");
        assert_eq!(DriverState::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_auth_options_rooted_at_home() {
        let auth = AuthOptions::rooted_at(Path::new("/home/dev/.devvm"));
        assert_eq!(auth.cert_dir, PathBuf::from("/home/dev/.devvm"));
        assert_eq!(auth.store_path, PathBuf::from("/home/dev/.devvm"));
        assert_eq!(auth.ca_cert_path, PathBuf::from("/home/dev/.devvm/certs/ca.pem"));
    }

    #[test]
    fn test_record_raw_driver_bytes_are_pretty_json() {
        let record = MachineRecord::new(
            "devvm",
            DriverKind::HyperV,
            serde_json::json!({ "VSwitch": "Default Switch", "MachineName": "devvm" }),
        );
        let text = String::from_utf8(record.raw_driver_bytes()).unwrap();
        assert!(text.contains("\"VSwitch\": \"Default Switch\""));
    }
}
