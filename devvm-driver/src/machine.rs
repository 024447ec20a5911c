//! A loaded machine: persisted record plus its live driver.

use std::fmt;

use tracing::{debug, instrument};

use crate::error::{DriverError, Result};
use crate::traits::Driver;
use crate::types::{DriverKind, DriverState, MachineRecord};

/// A machine record bound to the driver that controls it.
pub struct Machine {
    pub record: MachineRecord,
    pub driver: Box<dyn Driver>,
}

impl Machine {
    pub fn new(record: MachineRecord, driver: Box<dyn Driver>) -> Self {
        Self { record, driver }
    }

    /// Machine name.
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Driver kind stored in the record.
    pub fn kind(&self) -> DriverKind {
        self.record.driver_name
    }

    /// Stop the machine.
    ///
    /// Fails with [`DriverError::AlreadyInState`] when the driver already
    /// reports `Stopped`, so callers can tell a no-op apart from a failure.
    #[instrument(skip(self), fields(machine = %self.record.name))]
    pub async fn stop(&self) -> Result<()> {
        let state = self.driver.get_state().await?;
        if state == DriverState::Stopped {
            return Err(DriverError::AlreadyInState {
                name: self.record.name.clone(),
                state,
            });
        }

        debug!(state = %state, "Stopping machine");
        self.driver.stop().await
    }

    /// Refresh the record's raw driver config from the driver.
    pub fn sync_raw_driver(&mut self) -> Result<()> {
        self.record.raw_driver = self.driver.raw_config()?;
        Ok(())
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.record.name)
            .field("driver", &self.driver.driver_name())
            .finish()
    }
}
