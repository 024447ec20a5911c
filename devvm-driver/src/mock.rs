//! Mock driver backend for testing and development.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{DriverError, Result};
use crate::registry::DriverFactory;
use crate::traits::Driver;
use crate::types::{DriverKind, DriverState, MachineConfig};

/// Address handed out to mock guests.
pub const MOCK_GUEST_IP: &str = "192.168.99.100";

/// Raw configuration persisted for a mock machine.
///
/// Field names follow the hypervisor drivers so that tools reading the raw
/// driver blob (e.g. the `VSwitch` lookup) work against mock machines too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MockDriverConfig {
    pub machine_name: String,
    pub driver: DriverKind,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "CPU")]
    pub cpus: u32,
    pub memory: u64,
    pub disk_size: u64,
    #[serde(rename = "Boot2DockerURL")]
    pub iso_url: String,
    #[serde(rename = "VSwitch")]
    pub virtual_switch: String,
    /// Makes `create` fail, for exercising error paths.
    #[serde(default)]
    pub fail_create: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockVm {
    driver: DriverKind,
    state: DriverState,
    ip_address: String,
}

/// In-memory stand-in for a hypervisor.
///
/// All mock drivers built by the same [`MockDriverFactory`] share one
/// backend, so machine state survives the driver being reloaded from its
/// record. With a state file the backend also survives process restarts,
/// which is what `devvm --dev` uses.
pub struct MockHypervisor {
    vms: RwLock<HashMap<String, MockVm>>,
    state_file: Option<PathBuf>,
}

impl MockHypervisor {
    /// Create an empty in-memory backend.
    pub fn new() -> Self {
        info!("Creating mock driver backend");
        Self {
            vms: RwLock::new(HashMap::new()),
            state_file: None,
        }
    }

    /// Create a backend persisted to `path`, loading existing state if present.
    pub fn with_state_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let vms = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                DriverError::Internal(format!("Failed to read mock state {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };

        info!(state_file = %path.display(), machines = vms.len(), "Loaded mock driver backend");
        Ok(Self {
            vms: RwLock::new(vms),
            state_file: Some(path),
        })
    }

    /// Current state of a mock machine, `None` if it does not exist.
    pub fn state_of(&self, name: &str) -> Result<DriverState> {
        let vms = self.vms.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;
        Ok(vms.get(name).map(|vm| vm.state).unwrap_or(DriverState::None))
    }

    /// Force a machine into a state, simulating changes made outside devvm.
    pub fn set_state(&self, name: &str, state: DriverState) -> Result<()> {
        self.mutate(name, |vm| {
            vm.state = state;
            Ok(())
        })
    }

    /// Whether the backend holds resources for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.vms.read().map(|vms| vms.contains_key(name)).unwrap_or(false)
    }

    fn mutate<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut MockVm) -> Result<()>,
    {
        let mut vms = self.vms.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;

        let vm = vms.get_mut(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        f(vm)?;

        self.persist(&vms)
    }

    fn persist(&self, vms: &HashMap<String, MockVm>) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(vms)?;
        write_state_file(path, &content)
    }
}

fn write_state_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DriverError::Internal(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    std::fs::write(path, content).map_err(|e| {
        DriverError::Internal(format!("Failed to write mock state {}: {}", path.display(), e))
    })
}

impl Default for MockHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver for one machine on a [`MockHypervisor`].
pub struct MockDriver {
    config: MockDriverConfig,
    backend: Arc<MockHypervisor>,
}

impl MockDriver {
    pub fn new(config: MockDriverConfig, backend: Arc<MockHypervisor>) -> Self {
        Self { config, backend }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn kind(&self) -> DriverKind {
        self.config.driver
    }

    fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    fn raw_config(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }

    async fn get_state(&self) -> Result<DriverState> {
        self.backend.state_of(&self.config.machine_name)
    }

    #[instrument(skip(self), fields(machine = %self.config.machine_name, driver = %self.config.driver))]
    async fn create(&self) -> Result<()> {
        info!(cpus = self.config.cpus, memory_mb = self.config.memory, "Creating mock machine");

        if self.config.fail_create {
            warn!("Mock machine configured to fail creation");
            return Err(DriverError::CreateFailed(
                format!("mock creation of {} failed", self.config.machine_name)
            ));
        }

        let mut vms = self.backend.vms.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;

        if vms.contains_key(&self.config.machine_name) {
            return Err(DriverError::CreateFailed(
                format!("machine {} already exists", self.config.machine_name)
            ));
        }

        vms.insert(self.config.machine_name.clone(), MockVm {
            driver: self.config.driver,
            state: DriverState::Running,
            ip_address: self.config.ip_address.clone(),
        });
        self.backend.persist(&vms)?;

        info!("Mock machine created and running");
        Ok(())
    }

    #[instrument(skip(self), fields(machine = %self.config.machine_name))]
    async fn start(&self) -> Result<()> {
        info!("Starting mock machine");

        self.backend.mutate(&self.config.machine_name, |vm| {
            if vm.state == DriverState::Running {
                return Err(DriverError::InvalidState("machine is already running".to_string()));
            }
            vm.state = DriverState::Running;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(machine = %self.config.machine_name))]
    async fn stop(&self) -> Result<()> {
        info!("Stopping mock machine");

        self.backend.mutate(&self.config.machine_name, |vm| {
            vm.state = DriverState::Stopped;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(machine = %self.config.machine_name))]
    async fn remove(&self) -> Result<()> {
        info!("Removing mock machine");

        let mut vms = self.backend.vms.write().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;

        if vms.remove(&self.config.machine_name).is_none() {
            warn!("Mock machine not present in backend, nothing to remove");
            return Ok(());
        }
        self.backend.persist(&vms)?;

        debug!("Mock machine removed");
        Ok(())
    }

    async fn get_ip(&self) -> Result<String> {
        let vms = self.backend.vms.read().map_err(|_| {
            DriverError::Internal("Lock poisoned".to_string())
        })?;

        let vm = vms.get(&self.config.machine_name)
            .ok_or_else(|| DriverError::NotFound(self.config.machine_name.clone()))?;

        if vm.state != DriverState::Running {
            return Err(DriverError::InvalidState(
                format!("machine is {}, no IP available", vm.state)
            ));
        }
        Ok(vm.ip_address.clone())
    }
}

/// Factory registering mock drivers under a hypervisor kind.
pub struct MockDriverFactory {
    kind: DriverKind,
    backend: Arc<MockHypervisor>,
    fail_create: bool,
}

impl MockDriverFactory {
    pub fn new(kind: DriverKind, backend: Arc<MockHypervisor>) -> Self {
        Self { kind, backend, fail_create: false }
    }

    /// Machines created through this factory fail during `create`.
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }
}

impl DriverFactory for MockDriverFactory {
    fn kind(&self) -> DriverKind {
        self.kind
    }

    fn create_config(&self, machine_name: &str, config: &MachineConfig) -> Result<serde_json::Value> {
        let virtual_switch = if config.hyperv_virtual_switch.is_empty() {
            "Default Switch".to_string()
        } else {
            config.hyperv_virtual_switch.clone()
        };

        Ok(serde_json::to_value(MockDriverConfig {
            machine_name: machine_name.to_string(),
            driver: self.kind,
            ip_address: MOCK_GUEST_IP.to_string(),
            cpus: config.cpus,
            memory: config.memory_mb,
            disk_size: config.disk_size_mb,
            iso_url: config.iso_url.clone(),
            virtual_switch,
            fail_create: self.fail_create,
        })?)
    }

    fn load(&self, machine_name: &str, raw: &serde_json::Value) -> Result<Box<dyn Driver>> {
        let config: MockDriverConfig = serde_json::from_value(raw.clone())?;
        if config.machine_name != machine_name {
            return Err(DriverError::InvalidConfig(format!(
                "raw driver belongs to {}, not {}",
                config.machine_name, machine_name
            )));
        }
        Ok(Box::new(MockDriver::new(config, self.backend.clone())))
    }
}
