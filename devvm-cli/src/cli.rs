//! Command-line argument parsing.

use std::net::IpAddr;

use clap::{Args as ClapArgs, Parser, Subcommand};
use devvm_host::mount::{DEFAULT_9P_VERSION, DEFAULT_MOUNT_ID, DEFAULT_MSIZE};

/// devvm - Local development VM manager
#[derive(Parser, Debug)]
#[command(name = "devvm")]
#[command(about = "devvm - Run a container engine in a local VM")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (defaults to <home>/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Machine name
    #[arg(short, long, global = true, env = "DEVVM_PROFILE")]
    pub profile: Option<String>,

    /// Enable development mode (mock hypervisor for every VM driver)
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create or start the machine
    Start(StartArgs),
    /// Stop the running machine
    Stop,
    /// Delete the machine and its record
    Delete,
    /// Print the machine state
    Status,
    /// Open a shell on the machine, or run a command there
    Ssh {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Mount a host 9p share inside the machine
    Mount(MountArgs),
    /// Print the machine IP address
    Ip,
    /// Print shell exports for a docker client
    DockerEnv,
}

/// Machine settings for `start`. Unset flags keep the configured value.
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct StartArgs {
    /// VM driver (virtualbox, vmwarefusion, vmware, kvm, kvm2, hyperv, xhyve, hyperkit, none)
    #[arg(long)]
    pub vm_driver: Option<String>,

    /// Number of CPUs
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Memory in MB
    #[arg(long)]
    pub memory: Option<u64>,

    /// Disk size in MB
    #[arg(long)]
    pub disk_size: Option<u64>,

    /// Boot ISO location
    #[arg(long)]
    pub iso_url: Option<String>,

    /// Insecure registries passed to the engine
    #[arg(long)]
    pub insecure_registry: Vec<String>,

    /// Registry mirrors passed to the engine
    #[arg(long)]
    pub registry_mirror: Vec<String>,

    /// Environment for the engine (KEY=VALUE)
    #[arg(long)]
    pub docker_env: Vec<String>,

    /// Extra engine flags (flag=value)
    #[arg(long)]
    pub docker_opt: Vec<String>,

    /// VirtualBox host-only network CIDR
    #[arg(long)]
    pub host_only_cidr: Option<String>,

    /// Hyper-V virtual switch
    #[arg(long)]
    pub hyperv_virtual_switch: Option<String>,

    /// KVM network name
    #[arg(long)]
    pub kvm_network: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct MountArgs {
    /// Mount point inside the machine
    #[arg(default_value = "/devvm-host")]
    pub path: String,

    /// Port of the 9p server on the host
    #[arg(long, default_value_t = 5640)]
    pub port: u16,

    /// Host address seen by the machine (detected if unset)
    #[arg(long)]
    pub ip: Option<IpAddr>,

    /// 9p protocol version
    #[arg(long = "9p-version", default_value = DEFAULT_9P_VERSION)]
    pub protocol_version: String,

    #[arg(long, default_value_t = DEFAULT_MOUNT_ID)]
    pub uid: u32,

    #[arg(long, default_value_t = DEFAULT_MOUNT_ID)]
    pub gid: u32,

    /// 9p message size in bytes
    #[arg(long, default_value_t = DEFAULT_MSIZE)]
    pub msize: u32,
}
