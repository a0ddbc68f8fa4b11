//! Common utilities shared by the harness components

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::{HarnessConfig, Ports, ProtocolConfig, Timeouts};
pub use error::{Error, Result};
