//! exposure-core: Shared types and error handling for exposure scanning.
//!
//! This crate provides the data the port scanner reads and writes:
//! - The package inventory (packages, affected processes, listen ports)
//! - The identity of the host being scanned
//! - Common error types

pub mod error;
pub mod types;

pub use error::CoreError;
pub use types::{AffectedProcess, HostContext, Inventory, ListenPort, Package};
