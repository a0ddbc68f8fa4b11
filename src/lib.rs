//! Integration harness for obfuscating proxies
//!
//! Starts the proxy under test as child processes, pushes a known payload
//! (optionally behind a scripted SOCKS dialogue) through the chain, captures
//! what comes out of the far end, and turns every deviation into a labeled
//! failure report.

pub mod capture;
pub mod cli;
pub mod commands;
pub mod common;
pub mod fixture;
pub mod net;
pub mod process;
pub mod report;
pub mod scenario;
pub mod script;

// Re-export commonly used types for tests
pub use common::{Error, HarnessConfig, Ports, Result};
pub use scenario::{catalog, load_scenario, run_scenario, Scenario, ScenarioKind, ScenarioResult};
