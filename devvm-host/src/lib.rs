//! # devvm Host
//!
//! Lifecycle management for a single local development VM.
//!
//! [`HostManager`] drives a machine through create, start, stop and delete
//! against a [`MachineStore`] and the machine's driver, and sets up 9p
//! mounts over a [`RemoteExecutor`]. Collaborators sit behind traits so the
//! controller runs the same against real backends and test doubles.
//!
//! ```rust,ignore
//! let services = HostServices::system(&home, registry, Arc::new(TracingReporter));
//! let manager = HostManager::new(HostSettings::new(&home), services);
//!
//! manager.start_host(&MachineConfig::new("kvm2")).await?;
//! println!("{}", manager.get_host_status().await?);
//! ```

pub mod error;
pub mod exit;
pub mod image;
pub mod ip;
pub mod lifecycle;
pub mod mount;
pub mod provision;
pub mod remote;
pub mod report;
pub mod store;

pub use error::{HostError, Result, StoreError};
pub use exit::{exit_with, ExitCode};
pub use image::{ImageCache, IsoCache};
pub use ip::{
    CommandRunner, InterfaceAddrs, IpResolver, SystemCommandRunner, SystemInterfaces,
    HYPERKIT_GATEWAY, KVM2_GATEWAY, KVM_GATEWAY,
};
pub use lifecycle::{
    engine_options, HostManager, HostServices, HostSettings, CREATE_FAILURE_LOG_DRAIN,
    DOCKER_DAEMON_PORT,
};
pub use mount::{unmount_command, MountOptions, MountSpec};
pub use provision::{EngineProvisioner, Provisioner, Provisioning, SshProvisioning};
pub use remote::{RemoteExecutor, SshExecutor};
pub use report::{HostEvent, Reporter, TracingReporter};
pub use store::{FileStore, MachineStore};
