//! Scenario orchestration
//!
//! A scenario starts the proxies it needs, captures the exit side, drives
//! traffic through the chain, and merges every component's report into one
//! failure description.

mod catalog;
mod config;
mod runner;

pub use catalog::catalog;
pub use config::{load_scenario, PackValue, PortName, ScenarioFile, ScenarioBody, StepEntry};
pub use runner::run_scenario;

use std::path::PathBuf;

use serde::Serialize;

use crate::script::Script;

/// A runnable scenario
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    pub kind: ScenarioKind,
}

/// What a scenario does
#[derive(Debug, Clone)]
pub enum ScenarioKind {
    /// One proxy process chaining both ends; the payload is written
    /// straight into the entry port
    Direct { args: Vec<String> },
    /// A SOCKS client-side proxy, optionally backed by a server-side proxy;
    /// the script is played against the entry port. Without a server no
    /// exit-side capture is set up, so the script must end in a drop.
    Socks {
        client_args: Vec<String>,
        server_args: Option<Vec<String>>,
        script: Script,
    },
    /// Replay a timeline through the proxy and compare with a reference run
    Timeline {
        script_file: PathBuf,
        proxy_args: Vec<String>,
    },
}

impl Scenario {
    pub fn new(name: impl Into<String>, kind: ScenarioKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    /// Aggregated failure report; empty when the scenario passed
    pub report: String,
}
