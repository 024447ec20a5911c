//! Error types for machine lifecycle operations.

use std::path::PathBuf;

use devvm_driver::DriverError;
use thiserror::Error;

/// Errors raised by a [`MachineStore`](crate::store::MachineStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record exists for the machine.
    #[error("machine {0:?} does not exist")]
    NotFound(String),

    /// A record already exists for the machine.
    #[error("machine {0:?} already exists")]
    AlreadyExists(String),

    /// The machine name cannot be used as a store key.
    #[error("invalid machine name {0:?}")]
    InvalidName(String),

    /// Filesystem access failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The record could not be encoded or decoded.
    #[error("invalid machine record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The driver failed while the store was operating on it.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors that can occur during machine lifecycle operations.
#[derive(Error, Debug)]
pub enum HostError {
    /// The requested driver is unknown or not available.
    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// A driver call failed.
    #[error("{context}: {source}")]
    Driver {
        context: String,
        source: DriverError,
    },

    /// A machine store call failed.
    #[error("{context}: {source}")]
    Store {
        context: String,
        source: StoreError,
    },

    /// A lifecycle step failed; carries which step.
    #[error("{context}: {source}")]
    Step {
        context: String,
        source: Box<HostError>,
    },

    /// The operation may succeed if attempted again.
    #[error("temporary error: {0}")]
    Retriable(#[source] Box<HostError>),

    /// The machine has no persisted record.
    #[error("machine {0:?} does not exist")]
    MachineNotFound(String),

    /// The machine exists but is not running.
    #[error("{0:?} is not running")]
    NotRunning(String),

    /// The interface has no IPv4 address.
    #[error("no IPv4 address found for interface {0:?}")]
    NoIPv4Found(String),

    /// A field could not be extracted from driver configuration or output.
    #[error("could not find {field} in {driver} driver output")]
    DriverConfigField {
        driver: String,
        field: &'static str,
    },

    /// Network interfaces could not be enumerated.
    #[error("failed to list network interfaces: {0}")]
    Interfaces(String),

    /// A host-side command failed.
    #[error("{program} failed: {message}")]
    Command {
        program: String,
        message: String,
    },

    /// A command on the guest failed.
    #[error("command on {machine:?} failed: {message}")]
    Remote {
        machine: String,
        message: String,
    },

    /// The guest could not be provisioned.
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// The boot image could not be cached.
    #[error("image cache error: {0}")]
    ImageCache(String),

    /// A driver reported something that is not an IP address.
    #[error("parsing IP: {0:?}")]
    InvalidAddress(String),
}

impl HostError {
    /// Wrap a driver error with the step that failed, for use with `map_err`.
    pub fn driver(context: impl Into<String>) -> impl FnOnce(DriverError) -> HostError {
        let context = context.into();
        move |source| HostError::Driver { context, source }
    }

    /// Wrap a store error with the step that failed, for use with `map_err`.
    pub fn store(context: impl Into<String>) -> impl FnOnce(StoreError) -> HostError {
        let context = context.into();
        move |source| HostError::Store { context, source }
    }

    /// Attach the step that failed.
    pub fn context(self, context: impl Into<String>) -> HostError {
        HostError::Step {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Mark this error as worth retrying.
    pub fn retriable(self) -> HostError {
        HostError::Retriable(Box::new(self))
    }

    /// Whether the same operation may succeed on a later attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            HostError::Retriable(_) => true,
            HostError::Step { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    /// Whether the failure is an unknown or unavailable driver.
    pub fn is_unsupported_driver(&self) -> bool {
        match self {
            HostError::UnsupportedDriver(_) => true,
            HostError::Step { source, .. } | HostError::Retriable(source) => {
                source.is_unsupported_driver()
            }
            _ => false,
        }
    }
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, HostError>;
