//! # devvm Driver
//!
//! Driver abstraction layer for devvm machines.
//!
//! Every virtualization backend implements the [`Driver`] trait once. The
//! [`DriverRegistry`] maps a driver tag from user configuration to the
//! [`DriverFactory`] that builds driver configuration for new machines and
//! rebuilds drivers from persisted [`MachineRecord`]s.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            DriverRegistry               │
//! │       "kvm2" ──▶ DriverFactory          │
//! └─────────────────────┬───────────────────┘
//!                       │ load(raw_driver)
//!                       ▼
//! ┌─────────────────────────────────────────┐
//! │              Driver Trait               │
//! │  (get_state, create, start, stop, ...)  │
//! └─────────────────────┬───────────────────┘
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────────┐     ┌───────────────────┐
//! │    NoneDriver     │     │    MockDriver     │
//! │  (host, no VM)    │     │ (MockHypervisor)  │
//! └───────────────────┘     └───────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use devvm_driver::{DriverKind, DriverRegistry, MachineConfig, MockDriverFactory, MockHypervisor};
//!
//! let mut registry = DriverRegistry::with_builtin();
//! registry.register(Arc::new(MockDriverFactory::new(
//!     DriverKind::Kvm2,
//!     Arc::new(MockHypervisor::new()),
//! )));
//!
//! let factory = registry.resolve("kvm2")?;
//! let raw = factory.create_config("devvm", &MachineConfig::new("kvm2"))?;
//! let driver = factory.load("devvm", &raw)?;
//! driver.create().await?;
//! ```

pub mod error;
pub mod machine;
pub mod mock;
pub mod none;
pub mod registry;
pub mod traits;
pub mod types;

pub use error::DriverError;
pub use machine::Machine;
pub use mock::{MockDriver, MockDriverConfig, MockDriverFactory, MockHypervisor, MOCK_GUEST_IP};
pub use none::{NoneDriver, NoneDriverFactory};
pub use registry::{DriverFactory, DriverRegistry};
pub use traits::{Driver, DEFAULT_SSH_USER};
pub use types::*;
