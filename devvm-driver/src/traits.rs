//! Core driver abstraction trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DriverKind, DriverState, SshTarget};

/// Default SSH user on devvm guest images.
pub const DEFAULT_SSH_USER: &str = "docker";

/// Core driver abstraction trait.
///
/// Every virtualization backend implements this once. A driver instance is
/// bound to a single machine; it is rebuilt from the persisted raw config
/// every time the machine is loaded, so implementations must not assume
/// state survives between loads unless the backend itself keeps it.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend kind of this driver.
    fn kind(&self) -> DriverKind;

    /// Name of the driver as stored in machine records.
    fn driver_name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Name of the machine this driver controls.
    fn machine_name(&self) -> &str;

    /// Driver-specific configuration, persisted as the record's raw driver.
    fn raw_config(&self) -> Result<serde_json::Value>;

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Current state, queried from the backend on every call.
    async fn get_state(&self) -> Result<DriverState>;

    /// Create the machine's resources and boot it.
    async fn create(&self) -> Result<()>;

    /// Start a stopped machine.
    async fn start(&self) -> Result<()>;

    /// Stop a running machine.
    async fn stop(&self) -> Result<()>;

    /// Tear down every backend resource of the machine.
    async fn remove(&self) -> Result<()>;

    // =========================================================================
    // Networking
    // =========================================================================

    /// Guest address as reported by the backend.
    async fn get_ip(&self) -> Result<String>;

    /// SSH endpoint of the guest.
    async fn ssh_target(&self) -> Result<SshTarget> {
        Ok(SshTarget {
            host: self.get_ip().await?,
            port: 22,
            user: DEFAULT_SSH_USER.to_string(),
            key_path: None,
        })
    }
}
