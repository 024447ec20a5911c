//! Host-facing IP resolution.
//!
//! Finds the address the guest uses to reach the host (and vice versa). Some
//! drivers use a fixed gateway on their host-only network; others need the
//! address of a host interface named in driver config or driver tool output.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use devvm_driver::{DriverKind, Machine};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{HostError, Result};

/// Gateway of the kvm driver's `docker-machines` network.
pub const KVM_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 42, 1);

/// Gateway of the kvm2 driver's private network.
pub const KVM2_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 39, 1);

/// Gateway of the vmnet network used by xhyve and hyperkit.
pub const HYPERKIT_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 64, 1);

static VSWITCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""VSwitch":\s*"(.*?)""#).expect("VSwitch pattern is valid"));

static HOSTONLY_ADAPTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"hostonlyadapter2="(.*?)""#).expect("adapter pattern is valid"));

/// Enumerates host network interface addresses.
pub trait InterfaceAddrs: Send + Sync {
    /// All `(interface name, address)` pairs, in platform order.
    fn addresses(&self) -> Result<Vec<(String, IpAddr)>>;
}

/// Interface enumeration backed by the operating system.
pub struct SystemInterfaces;

impl InterfaceAddrs for SystemInterfaces {
    fn addresses(&self) -> Result<Vec<(String, IpAddr)>> {
        local_ip_address::list_afinet_netifas()
            .map_err(|e| HostError::Interfaces(e.to_string()))
    }
}

/// Runs host-side programs and captures their output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning stdout on success.
    async fn output(&self, program: &str, args: &[&str]) -> Result<String>;
}

/// Runs programs as local child processes.
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn output(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!(program = %program, ?args, "Running host command");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| HostError::Command {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(HostError::Command {
                program: program.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Locate the VirtualBox management tool.
///
/// On Windows the installer records its location in `VBOX_INSTALL_PATH` or
/// `VBOX_MSI_INSTALL_PATH`; elsewhere it is expected on `PATH`.
pub fn detect_vboxmanage_cmd() -> String {
    if cfg!(windows) {
        for var in ["VBOX_INSTALL_PATH", "VBOX_MSI_INSTALL_PATH"] {
            if let Ok(dir) = std::env::var(var) {
                let candidate = Path::new(&dir).join("VBoxManage.exe");
                if candidate.exists() {
                    return candidate.to_string_lossy().into_owned();
                }
            }
        }
        return "VBoxManage.exe".to_string();
    }
    "VBoxManage".to_string()
}

/// Resolves the host-facing IP for a machine based on its driver.
pub struct IpResolver {
    interfaces: Arc<dyn InterfaceAddrs>,
    commands: Arc<dyn CommandRunner>,
    vboxmanage: String,
}

impl IpResolver {
    pub fn new(interfaces: Arc<dyn InterfaceAddrs>, commands: Arc<dyn CommandRunner>) -> Self {
        Self {
            interfaces,
            commands,
            vboxmanage: detect_vboxmanage_cmd(),
        }
    }

    /// Resolver using the host's interfaces and processes.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemInterfaces), Arc::new(SystemCommandRunner))
    }

    /// Address used for host↔guest communication.
    ///
    /// Depends only on the driver kind and host networking, never on the
    /// machine's running state.
    #[instrument(skip(self, machine), fields(machine = %machine.name(), driver = %machine.kind()))]
    pub async fn host_facing_ip(&self, machine: &Machine) -> Result<IpAddr> {
        let ip = match machine.kind() {
            DriverKind::Kvm => KVM_GATEWAY,
            DriverKind::Kvm2 => KVM2_GATEWAY,
            DriverKind::Xhyve | DriverKind::HyperKit => HYPERKIT_GATEWAY,
            DriverKind::HyperV => {
                let switch = hyperv_virtual_switch(&machine.record.raw_driver_bytes())?;
                let iface = format!("vEthernet ({})", switch);
                self.first_ipv4_for_interface(&iface)
                    .map_err(|e| e.context(format!("ip for interface ({})", switch)))?
            }
            DriverKind::VirtualBox => {
                let info = self
                    .commands
                    .output(
                        &self.vboxmanage,
                        &["showvminfo", machine.name(), "--machinereadable"],
                    )
                    .await
                    .map_err(|e| e.context("vboxmanage"))?;
                let iface = virtualbox_hostonly_adapter(&info)?;
                self.first_ipv4_for_interface(&iface)
                    .map_err(|e| e.context("getting VM/host IP address"))?
            }
            DriverKind::None | DriverKind::Vmware | DriverKind::VmwareFusion => {
                return Err(HostError::UnsupportedDriver(format!(
                    "{} (no host-facing IP)",
                    machine.kind()
                )));
            }
        };

        debug!(ip = %ip, "Resolved host-facing IP");
        Ok(IpAddr::V4(ip))
    }

    /// First IPv4 address of the named interface. IPv6 addresses are skipped.
    pub fn first_ipv4_for_interface(&self, name: &str) -> Result<Ipv4Addr> {
        self.interfaces
            .addresses()?
            .into_iter()
            .filter(|(iface, _)| iface == name)
            .find_map(|(_, addr)| match addr {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| HostError::NoIPv4Found(name.to_string()))
    }
}

/// Extract the Hyper-V virtual switch name from the raw driver config.
fn hyperv_virtual_switch(raw_driver: &[u8]) -> Result<String> {
    let raw = String::from_utf8_lossy(raw_driver);
    VSWITCH_RE
        .captures(&raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| HostError::DriverConfigField {
            driver: DriverKind::HyperV.to_string(),
            field: "VSwitch",
        })
}

/// Extract the host-only adapter from `VBoxManage showvminfo --machinereadable`.
fn virtualbox_hostonly_adapter(info: &str) -> Result<String> {
    HOSTONLY_ADAPTER_RE
        .captures(info)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| HostError::DriverConfigField {
            driver: DriverKind::VirtualBox.to_string(),
            field: "hostonlyadapter2",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use devvm_driver::{DriverRegistry, MachineConfig, MockDriverFactory, MockHypervisor};

    struct FakeInterfaces(Vec<(String, IpAddr)>);

    impl InterfaceAddrs for FakeInterfaces {
        fn addresses(&self) -> Result<Vec<(String, IpAddr)>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeCommands {
        stdout: String,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for FakeCommands {
        async fn output(&self, program: &str, args: &[&str]) -> Result<String> {
            self.calls.lock().unwrap().push(format!("{} {}", program, args.join(" ")));
            Ok(self.stdout.clone())
        }
    }

    fn resolver(ifaces: Vec<(&str, &str)>, commands: Arc<FakeCommands>) -> IpResolver {
        let addrs = ifaces
            .into_iter()
            .map(|(name, ip)| (name.to_string(), ip.parse().unwrap()))
            .collect();
        IpResolver::new(Arc::new(FakeInterfaces(addrs)), commands)
    }

    fn machine(kind: DriverKind, config: MachineConfig) -> Machine {
        let factory = MockDriverFactory::new(kind, Arc::new(MockHypervisor::new()));
        let mut registry = DriverRegistry::with_builtin();
        registry.register(Arc::new(factory));

        let factory = registry.get(kind).unwrap();
        let raw = factory.create_config("devvm", &config).unwrap();
        let driver = factory.load("devvm", &raw).unwrap();
        Machine::new(devvm_driver::MachineRecord::new("devvm", kind, raw), driver)
    }

    #[tokio::test]
    async fn test_fixed_gateways() {
        let r = resolver(vec![], Arc::new(FakeCommands::default()));
        let cases = [
            (DriverKind::Kvm, "192.168.42.1"),
            (DriverKind::Kvm2, "192.168.39.1"),
            (DriverKind::Xhyve, "192.168.64.1"),
            (DriverKind::HyperKit, "192.168.64.1"),
        ];

        for (kind, expected) in cases {
            let m = machine(kind, MachineConfig::new(kind.as_str()));
            // Twice, and with the machine never created: no state involved.
            for _ in 0..2 {
                let ip = r.host_facing_ip(&m).await.unwrap();
                assert_eq!(ip.to_string(), expected, "driver {}", kind);
            }
        }
    }

    #[tokio::test]
    async fn test_hyperv_uses_virtual_switch_interface() {
        let r = resolver(
            vec![
                ("vEthernet (External)", "fe80::1"),
                ("vEthernet (External)", "172.20.0.1"),
                ("vEthernet (External)", "172.20.0.2"),
                ("Ethernet", "10.0.0.5"),
            ],
            Arc::new(FakeCommands::default()),
        );
        let mut config = MachineConfig::new("hyperv");
        config.hyperv_virtual_switch = "External".to_string();

        let ip = r.host_facing_ip(&machine(DriverKind::HyperV, config)).await.unwrap();
        assert_eq!(ip, "172.20.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_virtualbox_uses_hostonly_adapter() {
        let commands = Arc::new(FakeCommands {
            stdout: "name=\"devvm\"\nnic2=\"hostonly\"\nhostonlyadapter2=\"vboxnet0\"\n".to_string(),
            ..Default::default()
        });
        let r = resolver(vec![("vboxnet0", "192.168.99.1")], commands.clone());

        let m = machine(DriverKind::VirtualBox, MachineConfig::new("virtualbox"));
        let ip = r.host_facing_ip(&m).await.unwrap();

        assert_eq!(ip.to_string(), "192.168.99.1");
        let calls = commands.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("showvminfo devvm --machinereadable"));
    }

    #[tokio::test]
    async fn test_virtualbox_without_hostonly_adapter() {
        let commands = Arc::new(FakeCommands {
            stdout: "name=\"devvm\"\n".to_string(),
            ..Default::default()
        });
        let r = resolver(vec![], commands);
        let m = machine(DriverKind::VirtualBox, MachineConfig::new("virtualbox"));

        assert!(matches!(
            r.host_facing_ip(&m).await,
            Err(HostError::DriverConfigField { field: "hostonlyadapter2", .. })
        ));
    }

    #[tokio::test]
    async fn test_unsupported_driver_has_no_side_effects() {
        let commands = Arc::new(FakeCommands::default());
        let r = resolver(vec![], commands.clone());

        for kind in [DriverKind::None, DriverKind::Vmware, DriverKind::VmwareFusion] {
            let m = machine(kind, MachineConfig::new(kind.as_str()));
            assert!(matches!(r.host_facing_ip(&m).await, Err(HostError::UnsupportedDriver(_))));
        }
        assert!(commands.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_interface_without_ipv4() {
        let r = resolver(vec![("eth0", "fe80::2")], Arc::new(FakeCommands::default()));
        assert!(matches!(
            r.first_ipv4_for_interface("eth0"),
            Err(HostError::NoIPv4Found(name)) if name == "eth0"
        ));
        assert!(matches!(
            r.first_ipv4_for_interface("missing0"),
            Err(HostError::NoIPv4Found(_))
        ));
    }

    #[test]
    fn test_hyperv_switch_pattern() {
        let raw = br#"{
  "MachineName": "devvm",
  "VSwitch": "Default Switch",
  "DiskSize": 20000
}"#;
        assert_eq!(hyperv_virtual_switch(raw).unwrap(), "Default Switch");
        assert!(hyperv_virtual_switch(b"{}").is_err());
    }
}
