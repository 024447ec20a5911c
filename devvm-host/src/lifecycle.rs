//! Host lifecycle controller.
//!
//! [`HostManager`] reconciles the persisted machine record with the live
//! driver state. Every operation is safe to repeat: starting a running
//! machine reuses it, stopping a stopped one succeeds.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use devvm_driver::{
    AuthOptions, DriverError, DriverKind, DriverRegistry, DriverState, EngineOptions, Machine,
    MachineConfig, DEFAULT_MACHINE_NAME, DEFAULT_SERVICE_CIDR,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{HostError, Result, StoreError};
use crate::exit::{exit_with, ExitCode};
use crate::image::{ImageCache, IsoCache};
use crate::ip::IpResolver;
use crate::mount::{unmount_command, MountOptions, MountSpec};
use crate::provision::{Provisioning, SshProvisioning};
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::report::{HostEvent, Reporter};
use crate::store::{FileStore, MachineStore};

/// Pause after a failed create so driver logs can reach the console.
pub const CREATE_FAILURE_LOG_DRAIN: Duration = Duration::from_secs(2);

/// TLS port of the container engine inside the guest.
pub const DOCKER_DAEMON_PORT: u16 = 2376;

/// Per-invocation settings.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Machine this manager operates on
    pub machine_name: String,
    /// devvm home directory (certificates, records, cache)
    pub home_dir: PathBuf,
    /// Warn when a deprecated driver is requested
    pub show_driver_deprecation_notification: bool,
}

impl HostSettings {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            machine_name: DEFAULT_MACHINE_NAME.to_string(),
            home_dir: home_dir.into(),
            show_driver_deprecation_notification: true,
        }
    }

    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = name.into();
        self
    }
}

/// Collaborators used by [`HostManager`].
#[derive(Clone)]
pub struct HostServices {
    pub store: Arc<dyn MachineStore>,
    pub registry: Arc<DriverRegistry>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub provisioning: Arc<dyn Provisioning>,
    pub images: Arc<dyn ImageCache>,
    pub ip_resolver: Arc<IpResolver>,
    pub reporter: Arc<dyn Reporter>,
}

impl HostServices {
    /// Services backed by the filesystem, OpenSSH and the host network.
    pub fn system(
        home_dir: &std::path::Path,
        registry: Arc<DriverRegistry>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let remote: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new());
        Self {
            store: Arc::new(FileStore::new(home_dir, registry.clone())),
            registry,
            provisioning: Arc::new(SshProvisioning::new(remote.clone())),
            remote,
            images: Arc::new(IsoCache::new(home_dir.join("cache").join("iso"))),
            ip_resolver: Arc::new(IpResolver::system()),
            reporter,
        }
    }
}

/// Engine options for `config`. The service CIDR is always an insecure registry.
pub fn engine_options(config: &MachineConfig) -> EngineOptions {
    let mut insecure_registry = vec![DEFAULT_SERVICE_CIDR.to_string()];
    insecure_registry.extend(config.insecure_registry.iter().cloned());

    EngineOptions {
        env: config.docker_env.clone(),
        insecure_registry,
        registry_mirror: config.registry_mirror.clone(),
        arbitrary_flags: config.docker_opt.clone(),
        ..Default::default()
    }
}

/// Lifecycle operations for one named machine.
pub struct HostManager {
    settings: HostSettings,
    services: HostServices,
}

impl HostManager {
    pub fn new(settings: HostSettings, services: HostServices) -> Self {
        Self { settings, services }
    }

    pub fn machine_name(&self) -> &str {
        &self.settings.machine_name
    }

    fn report(&self, event: HostEvent) {
        self.services.reporter.report(&event);
    }

    /// Start the machine, creating it on first use.
    #[instrument(skip(self, config), fields(machine = %self.settings.machine_name, driver = %config.vm_driver))]
    pub async fn start_host(&self, config: &MachineConfig) -> Result<Machine> {
        let name = self.machine_name();
        let exists = self
            .services
            .store
            .exists(name)
            .await
            .map_err(HostError::store("checking machine existence"))?;

        let mut machine = if exists {
            self.reuse_host(config).await?
        } else {
            info!("Machine does not exist, creating");
            self.create_host(config).await?
        };

        machine.record.host_options.engine = engine_options(config);
        self.save(&mut machine).await?;

        self.report(HostEvent::WaitingForSsh);
        if !machine.record.host_options.engine.env.is_empty() {
            self.provision(&machine).await?;
        }

        if !machine.kind().is_none() {
            self.services
                .provisioning
                .configure_auth(&machine)
                .await
                .map_err(|e| e.context("Error configuring auth on host").retriable())?;
        }

        info!("Machine started");
        Ok(machine)
    }

    async fn reuse_host(&self, config: &MachineConfig) -> Result<Machine> {
        let mut machine = self.load_machine().await?;

        if machine.kind().as_str() != config.vm_driver {
            self.report(HostEvent::DriverMismatch {
                name: machine.name().to_string(),
                existing: machine.kind(),
                requested: config.vm_driver.clone(),
            });
        } else if machine.name() == DEFAULT_MACHINE_NAME {
            self.report(HostEvent::NewClusterTip);
        }

        let state = machine
            .driver
            .get_state()
            .await
            .map_err(HostError::driver("Error getting state for host"))?;

        if state == DriverState::Running {
            self.report(HostEvent::Reusing {
                name: machine.name().to_string(),
            });
            return Ok(machine);
        }

        self.report(HostEvent::Restarting {
            name: machine.name().to_string(),
            state,
        });
        machine
            .driver
            .start()
            .await
            .map_err(HostError::driver("start"))?;
        self.save(&mut machine).await?;
        Ok(machine)
    }

    async fn create_host(&self, config: &MachineConfig) -> Result<Machine> {
        self.pre_create_checks(config);

        let factory = self
            .services
            .registry
            .resolve(&config.vm_driver)
            .map_err(|e| {
                debug!(error = %e, "Driver lookup failed");
                HostError::UnsupportedDriver(config.vm_driver.clone())
            })?;
        let kind = factory.kind();

        self.report(HostEvent::Creating {
            driver: kind,
            cpus: config.cpus,
            memory_mb: config.memory_mb,
            disk_size_mb: config.disk_size_mb,
        });

        if !kind.is_none() {
            self.services
                .images
                .cache_image_from_url(&config.iso_url)
                .await
                .map_err(|e| e.context("Error attempting to cache ISO"))?;
        }

        let raw_driver = factory
            .create_config(self.machine_name(), config)
            .map_err(HostError::driver("Error creating driver config"))?;

        let mut machine = self
            .services
            .store
            .new_host(self.machine_name(), kind, raw_driver)
            .await
            .map_err(HostError::store("new host"))?;

        machine.record.host_options.auth = AuthOptions::rooted_at(&self.settings.home_dir);
        machine.record.host_options.engine = engine_options(config);

        if let Err(e) = self.services.store.create(&mut machine).await {
            warn!(error = %e, "Machine creation failed");
            tokio::time::sleep(CREATE_FAILURE_LOG_DRAIN).await;
            return Err(HostError::store("create")(e));
        }

        self.save(&mut machine).await?;
        Ok(machine)
    }

    fn pre_create_checks(&self, config: &MachineConfig) {
        if !self.settings.show_driver_deprecation_notification {
            return;
        }
        let replacement = config
            .vm_driver
            .parse::<DriverKind>()
            .ok()
            .and_then(|kind| kind.replacement().map(|r| (kind, r)));

        if let Some((driver, replacement)) = replacement {
            self.report(HostEvent::DriverDeprecated { driver, replacement });
        }
    }

    async fn provision(&self, machine: &Machine) -> Result<()> {
        let provisioner = self
            .services
            .provisioning
            .detect_provisioner(machine)
            .await
            .map_err(|e| e.context("detecting provisioner"))?;

        debug!(provisioner = provisioner.name(), "Provisioning engine");
        let options = &machine.record.host_options;
        provisioner
            .provision(machine, &options.swarm, &options.auth, &options.engine)
            .await
            .map_err(|e| e.context("provision"))
    }

    /// Stop the machine. Stopping a stopped machine succeeds.
    #[instrument(skip(self), fields(machine = %self.settings.machine_name))]
    pub async fn stop_host(&self) -> Result<()> {
        let machine = self.load_machine().await?;
        self.report(HostEvent::Stopping {
            name: machine.name().to_string(),
        });

        match machine.stop().await {
            Ok(()) => {
                info!("Machine stopped");
                Ok(())
            }
            Err(e) if e.is_already_stopped() => {
                info!("Machine already stopped");
                Ok(())
            }
            Err(e) => Err(HostError::driver(format!("stop: {}", machine.name()))(e).retriable()),
        }
    }

    /// Delete the machine and its record.
    #[instrument(skip(self), fields(machine = %self.settings.machine_name))]
    pub async fn delete_host(&self) -> Result<()> {
        let machine = self.load_machine().await?;

        self.try_power_off(&machine).await;

        self.report(HostEvent::Deleting {
            name: machine.name().to_string(),
            driver: machine.kind(),
        });
        machine
            .driver
            .remove()
            .await
            .map_err(HostError::driver("host remove"))?;
        self.services
            .store
            .remove(machine.name())
            .await
            .map_err(HostError::store("removing machine record"))?;

        info!("Machine deleted");
        Ok(())
    }

    /// Shut the guest down cleanly when possible. Never fails.
    async fn try_power_off(&self, machine: &Machine) {
        if machine.kind().is_none() {
            return;
        }

        match machine.driver.get_state().await {
            Ok(DriverState::Running) => {}
            Ok(state) => {
                debug!(state = %state, "Skipping power off");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Unable to get host state, skipping power off");
                return;
            }
        }

        self.report(HostEvent::PoweringOff {
            name: machine.name().to_string(),
        });
        // The connection usually drops while the guest halts.
        if let Err(e) = self.services.remote.run_command(machine, "sudo poweroff").await {
            info!(error = %e, "Power off returned an error");
        }
    }

    /// Live driver state as text, or `"None"` if the machine does not exist.
    #[instrument(skip(self), fields(machine = %self.settings.machine_name))]
    pub async fn get_host_status(&self) -> Result<String> {
        let exists = self
            .services
            .store
            .exists(self.machine_name())
            .await
            .map_err(HostError::store("checking machine existence"))?;
        if !exists {
            return Ok(DriverState::None.to_string());
        }

        let machine = self.load_machine().await?;
        let state = machine
            .driver
            .get_state()
            .await
            .map_err(HostError::driver("getting state"))?;
        Ok(state.to_string())
    }

    /// Terminate the process unless the machine is running.
    pub async fn ensure_running_or_exit(&self, exit_code: ExitCode) {
        match self.get_host_status().await {
            Err(e) => exit_with(ExitCode::Failure, format!("Error getting host status: {}", e)),
            Ok(status) if status != DriverState::Running.as_str() => {
                exit_with(exit_code, format!("{} is not running", self.machine_name()))
            }
            Ok(_) => {}
        }
    }

    /// Load `name`, failing with [`HostError::MachineNotFound`] if absent.
    pub async fn check_if_host_exists_and_load(&self, name: &str) -> Result<Machine> {
        let exists = self
            .services
            .store
            .exists(name)
            .await
            .map_err(HostError::store(format!("checking if {} exists", name)))?;
        if !exists {
            return Err(HostError::MachineNotFound(name.to_string()));
        }
        self.services.store.load(name).await.map_err(load_error(name))
    }

    async fn load_machine(&self) -> Result<Machine> {
        let name = self.machine_name();
        self.services.store.load(name).await.map_err(load_error(name))
    }

    async fn save(&self, machine: &mut Machine) -> Result<()> {
        self.services
            .store
            .save(machine)
            .await
            .map_err(HostError::store("saving machine"))
    }

    /// IP address the driver reports for the guest.
    pub async fn get_host_driver_ip(&self) -> Result<IpAddr> {
        let machine = self.check_if_host_exists_and_load(self.machine_name()).await?;
        let ip = machine
            .driver
            .get_ip()
            .await
            .map_err(HostError::driver("getting IP"))?;
        ip.trim()
            .parse()
            .map_err(|_| HostError::InvalidAddress(ip.clone()))
    }

    /// Environment for a docker client talking to the guest engine.
    pub async fn get_host_docker_env(&self) -> Result<BTreeMap<String, String>> {
        let ip = self.get_host_driver_ip().await?;
        let mut env = BTreeMap::new();
        env.insert("DOCKER_TLS_VERIFY".to_string(), "1".to_string());
        env.insert(
            "DOCKER_HOST".to_string(),
            format!("tcp://{}", std::net::SocketAddr::new(ip, DOCKER_DAEMON_PORT)),
        );
        env.insert(
            "DOCKER_CERT_PATH".to_string(),
            self.settings.home_dir.join("certs").display().to_string(),
        );
        Ok(env)
    }

    /// Open an interactive shell on the running guest.
    #[instrument(skip(self), fields(machine = %self.settings.machine_name))]
    pub async fn create_ssh_shell(&self, args: &[String]) -> Result<()> {
        let machine = self.check_if_host_exists_and_load(self.machine_name()).await?;
        let state = machine
            .driver
            .get_state()
            .await
            .map_err(HostError::driver("getting state"))?;
        if state != DriverState::Running {
            return Err(HostError::NotRunning(machine.name().to_string()));
        }
        self.services.remote.shell(&machine, args).await
    }

    /// Address the guest uses to reach the host.
    pub async fn host_facing_ip(&self) -> Result<IpAddr> {
        let machine = self.check_if_host_exists_and_load(self.machine_name()).await?;
        self.services.ip_resolver.host_facing_ip(&machine).await
    }

    /// Mount a host 9p share into the guest, replacing any previous mount.
    #[instrument(skip(self, options), fields(machine = %self.settings.machine_name, path = %options.path))]
    pub async fn mount_host(&self, ip: Option<IpAddr>, options: &MountOptions) -> Result<()> {
        let machine = self.check_if_host_exists_and_load(self.machine_name()).await?;
        let ip = match ip {
            Some(ip) => ip,
            None => self
                .services
                .ip_resolver
                .host_facing_ip(&machine)
                .await
                .map_err(|e| e.context("getting host IP"))?,
        };

        let spec = MountSpec::new(ip, options);
        self.report(HostEvent::Mounting {
            source: format!("{}:{}", spec.ip, spec.port),
            target: spec.path.clone(),
        });

        if let Err(e) = self
            .services
            .remote
            .run_command(&machine, &unmount_command(&spec.path))
            .await
        {
            debug!(error = %e, "Unmount before mount failed");
        }

        self.services
            .remote
            .run_command(&machine, &spec.mount_command())
            .await
            .map_err(|e| e.context("running mount"))?;

        info!(ip = %spec.ip, "Mounted");
        Ok(())
    }
}

fn load_error(name: &str) -> impl FnOnce(StoreError) -> HostError + '_ {
    move |e| match e {
        StoreError::NotFound(_) => HostError::MachineNotFound(name.to_string()),
        StoreError::Driver(DriverError::DriverNotFound(kind)) => HostError::UnsupportedDriver(
            format!("{} (machine {:?} was created with this driver, which is not available)", kind, name),
        ),
        e => HostError::store(format!("loading {}", name))(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_options_prefixes_service_cidr() {
        let config = MachineConfig::new("kvm2")
            .with_insecure_registry("registry.local:5000")
            .with_docker_env("HTTP_PROXY=proxy:3128");
        let engine = engine_options(&config);

        assert_eq!(engine.insecure_registry, vec!["10.96.0.0/12", "registry.local:5000"]);
        assert_eq!(engine.env, vec!["HTTP_PROXY=proxy:3128"]);
        assert!(engine.tls_verify);
    }

    #[test]
    fn test_settings_default_name() {
        let settings = HostSettings::new("/tmp/devvm");
        assert_eq!(settings.machine_name, "devvm");
        assert_eq!(settings.with_machine_name("other").machine_name, "other");
    }
}
