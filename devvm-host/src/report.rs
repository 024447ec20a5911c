//! User-facing lifecycle events.

use std::fmt;

use devvm_driver::{DriverKind, DriverState};
use tracing::{info, warn};

/// A step or notice emitted by [`HostManager`](crate::HostManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A new machine is being created.
    Creating {
        driver: DriverKind,
        cpus: u32,
        memory_mb: u64,
        disk_size_mb: u64,
    },
    /// The requested driver has a successor.
    DriverDeprecated {
        driver: DriverKind,
        replacement: DriverKind,
    },
    /// The existing machine uses a different driver than requested.
    DriverMismatch {
        name: String,
        existing: DriverKind,
        requested: String,
    },
    /// Hint for creating a second machine next to the default one.
    NewClusterTip,
    /// The machine is already running and will be reused.
    Reusing { name: String },
    /// The machine exists but is not running.
    Restarting { name: String, state: DriverState },
    WaitingForSsh,
    Stopping { name: String },
    PoweringOff { name: String },
    Deleting { name: String, driver: DriverKind },
    Mounting { source: String, target: String },
}

impl HostEvent {
    /// Whether the event should be surfaced as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            HostEvent::DriverDeprecated { .. } | HostEvent::DriverMismatch { .. }
        )
    }

    /// Short prefix for console output.
    pub fn style(&self) -> &'static str {
        match self {
            HostEvent::Creating { .. } => "🔥",
            HostEvent::DriverDeprecated { .. } | HostEvent::DriverMismatch { .. } => "⚠️ ",
            HostEvent::NewClusterTip => "💡",
            HostEvent::Reusing { .. } | HostEvent::Restarting { .. } => "🔄",
            HostEvent::WaitingForSsh => "⌛",
            HostEvent::Stopping { .. } | HostEvent::PoweringOff { .. } => "✋",
            HostEvent::Deleting { .. } => "🔥",
            HostEvent::Mounting { .. } => "📁",
        }
    }
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::Creating {
                driver,
                cpus,
                memory_mb,
                disk_size_mb,
            } => write!(
                f,
                "Creating {} VM (CPUs={}, Memory={}MB, Disk={}MB) ...",
                driver, cpus, memory_mb, disk_size_mb
            ),
            HostEvent::DriverDeprecated { driver, replacement } => write!(
                f,
                "The {} driver is deprecated and support for it will be removed in a future release. \
                 Please consider switching to the {} driver.",
                driver, replacement
            ),
            HostEvent::DriverMismatch {
                name,
                existing,
                requested,
            } => write!(
                f,
                "Ignoring --vm-driver={requested}, as the existing {name:?} VM was created using the {existing} driver.\n\
                 To switch drivers, you may create a new VM using `--vm-driver={requested}` after running: 'devvm delete'\n\
                 Alternatively, start a new cluster with: 'devvm start -p <name> --vm-driver={requested}'",
                name = name,
                existing = existing,
                requested = requested,
            ),
            HostEvent::NewClusterTip => f.write_str(
                "Tip: Use 'devvm start -p <name>' to create a new cluster, or 'devvm delete' to delete this one.",
            ),
            HostEvent::Reusing { name } => write!(f, "Using the running {:?} VM ...", name),
            HostEvent::Restarting { name, state } => {
                write!(f, "Restarting existing {:?} VM (state={}) ...", name, state)
            }
            HostEvent::WaitingForSsh => f.write_str("Waiting for SSH access ..."),
            HostEvent::Stopping { name } => write!(f, "Stopping {:?} ...", name),
            HostEvent::PoweringOff { name } => write!(f, "Powering off {:?} via SSH ...", name),
            HostEvent::Deleting { name, driver } => {
                write!(f, "Deleting {:?} in {} ...", name, driver)
            }
            HostEvent::Mounting { source, target } => {
                write!(f, "Mounting {} into {} ...", source, target)
            }
        }
    }
}

/// Sink for [`HostEvent`]s.
pub trait Reporter: Send + Sync {
    fn report(&self, event: &HostEvent);
}

/// Reporter that forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &HostEvent) {
        if event.is_warning() {
            warn!(event = ?event, "{}", event);
        } else {
            info!("{}", event);
        }
    }
}
