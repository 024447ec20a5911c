//! Error types for the driver abstraction layer.

use thiserror::Error;

use crate::types::DriverState;

/// Errors that can occur during driver operations.
#[derive(Error, Debug)]
pub enum DriverError {
    /// The driver tag is not one of the known driver kinds.
    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// The driver kind is known but no factory is registered for it.
    #[error("driver not found in registry: {0}")]
    DriverNotFound(String),

    /// The machine is already in the requested state.
    #[error("machine {name:?} is already {state}")]
    AlreadyInState { name: String, state: DriverState },

    /// The machine does not exist in the backend.
    #[error("machine not found: {0}")]
    NotFound(String),

    /// The machine is in an invalid state for the requested operation.
    #[error("invalid machine state for operation: {0}")]
    InvalidState(String),

    /// Failed to create the machine.
    #[error("failed to create machine: {0}")]
    CreateFailed(String),

    /// Failed to start the machine.
    #[error("failed to start machine: {0}")]
    StartFailed(String),

    /// Failed to stop the machine.
    #[error("failed to stop machine: {0}")]
    StopFailed(String),

    /// Failed to remove the machine.
    #[error("failed to remove machine: {0}")]
    RemoveFailed(String),

    /// Query failed.
    #[error("failed to query: {0}")]
    QueryFailed(String),

    /// Invalid driver configuration.
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Returns true if this error reports that the machine is already stopped.
    pub fn is_already_stopped(&self) -> bool {
        matches!(
            self,
            DriverError::AlreadyInState { state: DriverState::Stopped, .. }
        )
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(e: serde_json::Error) -> Self {
        DriverError::InvalidConfig(e.to_string())
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
