//! Error types for the integration harness
//!
//! Failures that are an expected test outcome (a proxy misbehaving) are
//! reported as text by the component that saw them. The variants here cover
//! the rest: broken scripts, socket trouble the harness cannot tolerate, and
//! configuration mistakes.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

use crate::report::escape_bytes;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Process Errors ===
    #[error("Failed to start '{program}': {source}")]
    ProcessSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    // === Script Errors ===
    #[error("Invalid script: {0}")]
    Script(String),

    #[error("Step {step}: expected {expected}, received {actual}")]
    ScriptMismatch {
        step: usize,
        expected: String,
        actual: String,
    },

    #[error("Step {step}: peer should have dropped the connection, received {received}")]
    DropViolation { step: usize, received: String },

    // === Socket Errors ===
    #[error("No data from {peer} within {timeout_ms} ms")]
    ReceiveTimeout { peer: String, timeout_ms: u64 },

    #[error("Could not connect to {addr} after {attempts} attempts: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scenario file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a script mismatch error, rendering both payloads escaped
    pub fn script_mismatch(step: usize, expected: &[u8], actual: &[u8]) -> Self {
        Self::ScriptMismatch {
            step,
            expected: quoted(expected),
            actual: quoted(actual),
        }
    }

    /// Create a drop violation error
    pub fn drop_violation(step: usize, received: &[u8]) -> Self {
        Self::DropViolation {
            step,
            received: quoted(received),
        }
    }

    /// Create a spawn error for the given program
    pub fn process_spawn(program: &str, source: io::Error) -> Self {
        Self::ProcessSpawn {
            program: program.to_string(),
            source,
        }
    }
}

fn quoted(bytes: &[u8]) -> String {
    format!("'{}'", escape_bytes(bytes))
}
