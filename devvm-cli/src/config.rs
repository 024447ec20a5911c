//! Configuration management for the devvm CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use devvm_driver::{MachineConfig, DEFAULT_MACHINE_NAME};
use serde::Deserialize;

use crate::cli::{Args, Command, StartArgs};

/// Environment variable overriding the devvm home directory.
pub const HOME_ENV_VAR: &str = "DEVVM_HOME";

/// Name of the config file inside the home directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Machine name used when `--profile` is not given
    pub profile: String,
    /// Warn when a deprecated driver is requested
    pub show_driver_deprecation_notification: bool,
    /// Use the mock hypervisor for every VM driver
    pub dev: bool,
    /// Machine settings applied on `start`
    pub machine: MachineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: DEFAULT_MACHINE_NAME.to_string(),
            show_driver_deprecation_notification: true,
            dev: false,
            machine: MachineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Configuration from CLI arguments and defaults only.
    pub fn default_with_cli(args: &Args) -> Self {
        Self::default().with_cli_overrides(args)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref profile) = args.profile {
            self.profile = profile.clone();
        }

        if args.dev {
            self.dev = true;
        }

        if let Command::Start(ref start) = args.command {
            apply_start_args(&mut self.machine, start);
        }

        self
    }
}

fn apply_start_args(machine: &mut MachineConfig, start: &StartArgs) {
    if let Some(ref driver) = start.vm_driver {
        machine.vm_driver = driver.clone();
    }
    if let Some(cpus) = start.cpus {
        machine.cpus = cpus;
    }
    if let Some(memory) = start.memory {
        machine.memory_mb = memory;
    }
    if let Some(disk_size) = start.disk_size {
        machine.disk_size_mb = disk_size;
    }
    if let Some(ref iso_url) = start.iso_url {
        machine.iso_url = iso_url.clone();
    }
    if let Some(ref cidr) = start.host_only_cidr {
        machine.host_only_cidr = cidr.clone();
    }
    if let Some(ref switch) = start.hyperv_virtual_switch {
        machine.hyperv_virtual_switch = switch.clone();
    }
    if let Some(ref network) = start.kvm_network {
        machine.kvm_network = network.clone();
    }

    // Repeated flags replace the configured list rather than extend it.
    let lists = [
        (&mut machine.insecure_registry, &start.insecure_registry),
        (&mut machine.registry_mirror, &start.registry_mirror),
        (&mut machine.docker_env, &start.docker_env),
        (&mut machine.docker_opt, &start.docker_opt),
    ];
    for (configured, flags) in lists {
        if !flags.is_empty() {
            *configured = flags.clone();
        }
    }
}

/// devvm home directory: `$DEVVM_HOME`, else `~/.devvm`.
pub fn devvm_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".devvm"))
        .context("Could not determine the user's home directory; set DEVVM_HOME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "profile: work\nmachine:\n  vm_driver: kvm2\n  memory_mb: 4096\n  docker_env:\n    - HTTP_PROXY=http://proxy:3128\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.profile, "work");
        assert!(config.show_driver_deprecation_notification);
        assert_eq!(config.machine.vm_driver, "kvm2");
        assert_eq!(config.machine.memory_mb, 4096);
        assert_eq!(config.machine.cpus, 2);
        assert_eq!(config.machine.docker_env, vec!["HTTP_PROXY=http://proxy:3128"]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(dir.path().join("absent.yaml")).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config {
            machine: MachineConfig::new("virtualbox").with_insecure_registry("old:5000"),
            ..Default::default()
        };
        let args = Args::parse_from([
            "devvm", "start", "-p", "ci", "--dev", "--vm-driver", "kvm2",
            "--insecure-registry", "new:5000",
        ]);

        let config = config.with_cli_overrides(&args);
        assert_eq!(config.profile, "ci");
        assert!(config.dev);
        assert_eq!(config.machine.vm_driver, "kvm2");
        assert_eq!(config.machine.insecure_registry, vec!["new:5000"]);
        assert_eq!(config.machine.memory_mb, 2048);
    }

    #[test]
    fn test_default_with_cli_ignores_start_flags_for_other_commands() {
        let args = Args::parse_from(["devvm", "status"]);
        let config = Config::default_with_cli(&args);
        assert_eq!(config.profile, "devvm");
        assert_eq!(config.machine.vm_driver, "virtualbox");
    }
}
