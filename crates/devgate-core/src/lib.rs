//! Shared vocabulary for the devgate workspace.
//!
//! Holds the identity types every other crate agrees on (protocol type codes,
//! device types, manufacturers, device identifiers), the workspace-wide
//! configuration error type and the numeric defaults used by transports and
//! discovery.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
