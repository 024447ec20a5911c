//! # devvm Common
//!
//! Shared utilities for the devvm crates.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use devvm_common::init_logging;
//!
//! init_logging("info").unwrap();
//! tracing::info!(machine = "devvm", "Starting");
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
