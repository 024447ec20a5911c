//! Lifecycle tests against the mock driver and an on-disk store.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use devvm_driver::{
    AuthOptions, DriverKind, DriverRegistry, DriverState, EngineOptions, Machine, MachineConfig,
    MockDriverFactory, MockHypervisor, SwarmOptions,
};
use devvm_host::{
    CommandRunner, ExitCode, FileStore, HostError, HostEvent, HostManager, HostServices, HostSettings,
    ImageCache, InterfaceAddrs, IpResolver, MachineStore, MountOptions, Provisioner,
    Provisioning, RemoteExecutor, Reporter, StoreError,
};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingReporter {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingReporter {
    fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap().clone()
    }

    fn position(&self, pred: impl Fn(&HostEvent) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: &HostEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
struct FakeRemote {
    commands: Mutex<Vec<String>>,
    fail_prefix: Option<&'static str>,
}

impl FakeRemote {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn run_command(&self, machine: &Machine, command: &str) -> devvm_host::Result<String> {
        self.commands.lock().unwrap().push(command.to_string());
        match self.fail_prefix {
            Some(prefix) if command.starts_with(prefix) => Err(HostError::Remote {
                machine: machine.name().to_string(),
                message: "exit status 1".to_string(),
            }),
            _ => Ok(String::new()),
        }
    }

    async fn shell(&self, _machine: &Machine, _args: &[String]) -> devvm_host::Result<()> {
        Ok(())
    }
}

struct CountingProvisioner {
    provisions: Arc<AtomicUsize>,
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    fn name(&self) -> &str {
        "buildroot"
    }

    async fn provision(
        &self,
        _machine: &Machine,
        _swarm: &SwarmOptions,
        _auth: &AuthOptions,
        _engine: &EngineOptions,
    ) -> devvm_host::Result<()> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeProvisioning {
    provisions: Arc<AtomicUsize>,
    auth_calls: AtomicUsize,
    fail_auth: bool,
}

#[async_trait]
impl Provisioning for FakeProvisioning {
    async fn detect_provisioner(&self, _machine: &Machine) -> devvm_host::Result<Box<dyn Provisioner>> {
        Ok(Box::new(CountingProvisioner {
            provisions: self.provisions.clone(),
        }))
    }

    async fn configure_auth(&self, _machine: &Machine) -> devvm_host::Result<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_auth {
            return Err(HostError::Provision("certificates rejected".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeImages {
    calls: AtomicUsize,
}

#[async_trait]
impl ImageCache for FakeImages {
    async fn cache_image_from_url(&self, _url: &str) -> devvm_host::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// FileStore that counts create calls.
struct CountingStore {
    inner: FileStore,
    creates: AtomicUsize,
}

#[async_trait]
impl MachineStore for CountingStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.exists(name).await
    }

    async fn load(&self, name: &str) -> Result<Machine, StoreError> {
        self.inner.load(name).await
    }

    async fn save(&self, machine: &mut Machine) -> Result<(), StoreError> {
        self.inner.save(machine).await
    }

    async fn new_host(
        &self,
        name: &str,
        kind: DriverKind,
        raw_driver: serde_json::Value,
    ) -> Result<Machine, StoreError> {
        self.inner.new_host(name, kind, raw_driver).await
    }

    async fn create(&self, machine: &mut Machine) -> Result<(), StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(machine).await
    }

    async fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.inner.remove(name).await
    }
}

struct NoInterfaces;

impl InterfaceAddrs for NoInterfaces {
    fn addresses(&self) -> devvm_host::Result<Vec<(String, IpAddr)>> {
        Ok(Vec::new())
    }
}

struct NoCommands;

#[async_trait]
impl CommandRunner for NoCommands {
    async fn output(&self, program: &str, _args: &[&str]) -> devvm_host::Result<String> {
        Err(HostError::Command {
            program: program.to_string(),
            message: "not available in tests".to_string(),
        })
    }
}

struct Harness {
    dir: TempDir,
    backend: Arc<MockHypervisor>,
    store: Arc<CountingStore>,
    remote: Arc<FakeRemote>,
    provisioning: Arc<FakeProvisioning>,
    images: Arc<FakeImages>,
    reporter: Arc<RecordingReporter>,
    manager: HostManager,
}

#[derive(Default)]
struct HarnessOptions {
    failing_create: bool,
    fail_auth: bool,
    remote_fail_prefix: Option<&'static str>,
}

fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

fn harness_with(options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockHypervisor::new());

    let mut registry = DriverRegistry::with_builtin();
    let kvm2 = MockDriverFactory::new(DriverKind::Kvm2, backend.clone());
    let kvm2 = if options.failing_create { kvm2.failing_create() } else { kvm2 };
    registry.register(Arc::new(kvm2));
    registry.register(Arc::new(MockDriverFactory::new(DriverKind::Kvm, backend.clone())));
    let registry = Arc::new(registry);

    let store = Arc::new(CountingStore {
        inner: FileStore::new(dir.path(), registry.clone()),
        creates: AtomicUsize::new(0),
    });
    let remote = Arc::new(FakeRemote {
        fail_prefix: options.remote_fail_prefix,
        ..Default::default()
    });
    let provisioning = Arc::new(FakeProvisioning {
        fail_auth: options.fail_auth,
        ..Default::default()
    });
    let images = Arc::new(FakeImages::default());
    let reporter = Arc::new(RecordingReporter::default());

    let services = HostServices {
        store: store.clone(),
        registry,
        remote: remote.clone(),
        provisioning: provisioning.clone(),
        images: images.clone(),
        ip_resolver: Arc::new(IpResolver::new(Arc::new(NoInterfaces), Arc::new(NoCommands))),
        reporter: reporter.clone(),
    };
    let manager = HostManager::new(HostSettings::new(dir.path()), services);

    Harness {
        dir,
        backend,
        store,
        remote,
        provisioning,
        images,
        reporter,
        manager,
    }
}

#[tokio::test]
async fn test_start_twice_creates_once() {
    let h = harness();
    let config = MachineConfig::new("kvm2");

    h.manager.start_host(&config).await.unwrap();
    h.manager.start_host(&config).await.unwrap();

    assert_eq!(h.store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.state_of("devvm").unwrap(), DriverState::Running);
    assert!(h.reporter.position(|e| matches!(e, HostEvent::Reusing { .. })).is_some());
    assert_eq!(h.provisioning.auth_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_restarts_stopped_machine() {
    let h = harness();
    let config = MachineConfig::new("kvm2");

    h.manager.start_host(&config).await.unwrap();
    h.backend.set_state("devvm", DriverState::Stopped).unwrap();
    h.manager.start_host(&config).await.unwrap();

    assert_eq!(h.store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.state_of("devvm").unwrap(), DriverState::Running);
    assert!(h
        .reporter
        .position(|e| matches!(e, HostEvent::Restarting { state: DriverState::Stopped, .. }))
        .is_some());
}

#[tokio::test]
async fn test_reuse_persists_new_engine_options() {
    let h = harness();

    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();
    assert_eq!(h.provisioning.provisions.load(Ordering::SeqCst), 0);

    let config = MachineConfig::new("kvm2")
        .with_insecure_registry("registry.local:5000")
        .with_docker_env("HTTP_PROXY=http://proxy:3128");
    h.manager.start_host(&config).await.unwrap();

    let record = h.store.load("devvm").await.unwrap().record;
    assert_eq!(
        record.host_options.engine.insecure_registry,
        vec!["10.96.0.0/12", "registry.local:5000"]
    );
    assert_eq!(record.host_options.engine.env, vec!["HTTP_PROXY=http://proxy:3128"]);
    assert_eq!(h.store.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.provisioning.provisions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_driver_mismatch_is_advisory() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    let machine = h.manager.start_host(&MachineConfig::new("virtualbox")).await.unwrap();

    assert_eq!(machine.kind(), DriverKind::Kvm2);
    let events = h.reporter.events();
    assert!(events.iter().any(|e| matches!(
        e,
        HostEvent::DriverMismatch { existing: DriverKind::Kvm2, requested, .. } if requested == "virtualbox"
    )));
    assert!(!events.iter().any(|e| matches!(e, HostEvent::NewClusterTip)));
}

#[tokio::test]
async fn test_default_name_tip_on_reuse() {
    let h = harness();
    let config = MachineConfig::new("kvm2");
    h.manager.start_host(&config).await.unwrap();
    h.manager.start_host(&config).await.unwrap();

    assert!(h.reporter.position(|e| matches!(e, HostEvent::NewClusterTip)).is_some());
}

#[tokio::test]
async fn test_deprecated_driver_warns() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm")).await.unwrap();

    assert!(h
        .reporter
        .position(|e| matches!(
            e,
            HostEvent::DriverDeprecated { driver: DriverKind::Kvm, replacement: DriverKind::Kvm2 }
        ))
        .is_some());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    h.manager.stop_host().await.unwrap();
    h.manager.stop_host().await.unwrap();

    assert_eq!(h.backend.state_of("devvm").unwrap(), DriverState::Stopped);
}

#[tokio::test]
async fn test_stop_missing_machine() {
    let h = harness();
    let err = h.manager.stop_host().await.unwrap_err();
    assert!(matches!(err, HostError::MachineNotFound(_)));
}

#[tokio::test]
async fn test_status() {
    let h = harness();
    assert_eq!(h.manager.get_host_status().await.unwrap(), "None");

    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();
    assert_eq!(h.manager.get_host_status().await.unwrap(), "Running");

    h.manager.stop_host().await.unwrap();
    assert_eq!(h.manager.get_host_status().await.unwrap(), "Stopped");
}

#[tokio::test]
async fn test_delete_powers_off_then_removes() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    h.manager.delete_host().await.unwrap();

    assert_eq!(h.remote.commands(), vec!["sudo poweroff"]);
    assert!(!h.backend.contains("devvm"));
    assert!(!h.store.exists("devvm").await.unwrap());
    assert_eq!(h.manager.get_host_status().await.unwrap(), "None");

    let power_off = h.reporter.position(|e| matches!(e, HostEvent::PoweringOff { .. }));
    let deleting = h.reporter.position(|e| matches!(e, HostEvent::Deleting { .. }));
    assert!(power_off.unwrap() < deleting.unwrap());
}

#[tokio::test]
async fn test_delete_tolerates_power_off_failure() {
    let h = harness_with(HarnessOptions {
        remote_fail_prefix: Some("sudo poweroff"),
        ..Default::default()
    });
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    h.manager.delete_host().await.unwrap();
    assert!(!h.backend.contains("devvm"));
}

#[tokio::test]
async fn test_delete_stopped_skips_power_off() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();
    h.manager.stop_host().await.unwrap();

    h.manager.delete_host().await.unwrap();
    assert!(h.remote.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_failure_waits_then_fails() {
    let h = harness_with(HarnessOptions {
        failing_create: true,
        ..Default::default()
    });

    let started = tokio::time::Instant::now();
    let err = h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap_err();

    assert!(started.elapsed() >= devvm_host::CREATE_FAILURE_LOG_DRAIN);
    assert!(matches!(err, HostError::Store { ref context, .. } if context == "create"));
    assert_eq!(h.provisioning.auth_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delete_after_failed_create() {
    let h = harness_with(HarnessOptions {
        failing_create: true,
        ..Default::default()
    });

    assert!(h.manager.start_host(&MachineConfig::new("kvm2")).await.is_err());
    assert!(h.store.exists("devvm").await.unwrap());
    assert_eq!(h.manager.get_host_status().await.unwrap(), "None");

    h.manager.delete_host().await.unwrap();

    assert!(!h.store.exists("devvm").await.unwrap());
    assert!(!h.backend.contains("devvm"));
    assert!(!h.remote.commands().iter().any(|c| c.contains("poweroff")));
}

#[tokio::test]
async fn test_record_with_unavailable_driver_is_unsupported() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    // Same home, but kvm2 is no longer registered.
    let registry = Arc::new(DriverRegistry::with_builtin());
    let services = HostServices {
        store: Arc::new(FileStore::new(h.dir.path(), registry.clone())),
        registry,
        remote: h.remote.clone(),
        provisioning: h.provisioning.clone(),
        images: h.images.clone(),
        ip_resolver: Arc::new(IpResolver::new(Arc::new(NoInterfaces), Arc::new(NoCommands))),
        reporter: h.reporter.clone(),
    };
    let manager = HostManager::new(HostSettings::new(h.dir.path()), services);

    let err = manager.delete_host().await.unwrap_err();
    assert!(matches!(err, HostError::UnsupportedDriver(ref msg) if msg.starts_with("kvm2")));
    assert_eq!(ExitCode::for_error(&err), ExitCode::Usage);
    assert!(manager.get_host_status().await.unwrap_err().is_unsupported_driver());
    assert!(h.store.exists("devvm").await.unwrap());
}

#[tokio::test]
async fn test_auth_failure_is_retriable() {
    let h = harness_with(HarnessOptions {
        fail_auth: true,
        ..Default::default()
    });

    let err = h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(h.backend.state_of("devvm").unwrap(), DriverState::Running);
}

#[tokio::test]
async fn test_none_driver_skips_image_auth_and_power_off() {
    let h = harness();

    let machine = h.manager.start_host(&MachineConfig::new("none")).await.unwrap();
    assert_eq!(machine.kind(), DriverKind::None);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.provisioning.auth_calls.load(Ordering::SeqCst), 0);

    h.manager.delete_host().await.unwrap();
    assert!(h.remote.commands().is_empty());
}

#[tokio::test]
async fn test_unsupported_driver_has_no_side_effects() {
    let h = harness();

    for tag in ["qemu", "hyperkit"] {
        let err = h.manager.start_host(&MachineConfig::new(tag)).await.unwrap_err();
        assert!(err.is_unsupported_driver(), "{}: {}", tag, err);
    }

    assert!(!h.store.exists("devvm").await.unwrap());
    assert_eq!(h.store.creates.load(Ordering::SeqCst), 0);
    assert_eq!(h.images.calls.load(Ordering::SeqCst), 0);
    assert!(h.reporter.position(|e| matches!(e, HostEvent::Creating { .. })).is_none());
}

#[tokio::test]
async fn test_mount_unmounts_first() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    h.manager
        .mount_host(None, &MountOptions::new("/mnt/host", 5640))
        .await
        .unwrap();

    let commands = h.remote.commands();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0], "sudo umount /mnt/host;");
    assert!(commands[1].contains("trans=tcp,port=5640,"));
    assert!(commands[1].contains("192.168.39.1 /mnt/host;"));
}

#[tokio::test]
async fn test_mount_ignores_unmount_failure() {
    let h = harness_with(HarnessOptions {
        remote_fail_prefix: Some("sudo umount"),
        ..Default::default()
    });
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    let ip: IpAddr = "10.0.2.2".parse().unwrap();
    h.manager
        .mount_host(Some(ip), &MountOptions::new("/data", 5640))
        .await
        .unwrap();
    assert!(h.remote.commands()[1].contains("10.0.2.2 /data;"));
}

#[tokio::test]
async fn test_mount_failure_is_fatal() {
    let h = harness_with(HarnessOptions {
        remote_fail_prefix: Some("\nsudo mkdir"),
        ..Default::default()
    });
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    let err = h
        .manager
        .mount_host(None, &MountOptions::new("/data", 5640))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("running mount"));
}

#[tokio::test]
async fn test_mount_requires_machine() {
    let h = harness();
    let err = h
        .manager
        .mount_host(None, &MountOptions::new("/data", 5640))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::MachineNotFound(_)));
}

#[tokio::test]
async fn test_docker_env() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();

    let env = h.manager.get_host_docker_env().await.unwrap();
    assert_eq!(env["DOCKER_HOST"], "tcp://192.168.99.100:2376");
    assert_eq!(env["DOCKER_TLS_VERIFY"], "1");
    assert!(env["DOCKER_CERT_PATH"].ends_with("certs"));
}

#[tokio::test]
async fn test_shell_requires_running_machine() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();
    h.manager.create_ssh_shell(&[]).await.unwrap();

    h.manager.stop_host().await.unwrap();
    let err = h.manager.create_ssh_shell(&[]).await.unwrap_err();
    assert!(matches!(err, HostError::NotRunning(_)));
}

#[tokio::test]
async fn test_host_facing_ip_uses_gateway() {
    let h = harness();
    h.manager.start_host(&MachineConfig::new("kvm2")).await.unwrap();
    h.manager.stop_host().await.unwrap();

    let ip = h.manager.host_facing_ip().await.unwrap();
    assert_eq!(ip, IpAddr::V4(devvm_host::KVM2_GATEWAY));
}
