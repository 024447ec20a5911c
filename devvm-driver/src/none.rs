//! The no-op driver: the "machine" is the host itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::registry::DriverFactory;
use crate::traits::Driver;
use crate::types::{DriverKind, DriverState, MachineConfig};

/// Raw configuration persisted for a `none` machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NoneDriverConfig {
    pub machine_name: String,
}

/// Driver that runs everything directly on the host.
///
/// There is nothing to create, boot or tear down, so every lifecycle call
/// succeeds and the state is always `Running`.
pub struct NoneDriver {
    config: NoneDriverConfig,
}

impl NoneDriver {
    pub fn new(machine_name: impl Into<String>) -> Self {
        Self {
            config: NoneDriverConfig { machine_name: machine_name.into() },
        }
    }
}

#[async_trait]
impl Driver for NoneDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::None
    }

    fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    fn raw_config(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }

    async fn get_state(&self) -> Result<DriverState> {
        Ok(DriverState::Running)
    }

    #[instrument(skip(self), fields(machine = %self.config.machine_name))]
    async fn create(&self) -> Result<()> {
        info!("Using the host directly, nothing to create");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        debug!(machine = %self.config.machine_name, "Stop is a no-op for the none driver");
        Ok(())
    }

    async fn remove(&self) -> Result<()> {
        debug!(machine = %self.config.machine_name, "Remove is a no-op for the none driver");
        Ok(())
    }

    async fn get_ip(&self) -> Result<String> {
        let ip = local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|_| "127.0.0.1".to_string());
        Ok(ip)
    }
}

/// Factory for [`NoneDriver`].
pub struct NoneDriverFactory;

impl DriverFactory for NoneDriverFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::None
    }

    fn create_config(&self, machine_name: &str, _config: &MachineConfig) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(NoneDriverConfig {
            machine_name: machine_name.to_string(),
        })?)
    }

    fn load(&self, _machine_name: &str, raw: &serde_json::Value) -> Result<Box<dyn Driver>> {
        let config: NoneDriverConfig = serde_json::from_value(raw.clone())?;
        Ok(Box::new(NoneDriver { config }))
    }
}
