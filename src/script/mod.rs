//! Scripted protocol exchanges
//!
//! A [`Script`] is an ordered list of steps played against a live
//! connection. Steps alternate between sending and receiving, starting
//! with a send. [`ScriptStep::ExpectDrop`] means the peer must hang up at
//! that point; it can only appear last.

mod interpreter;
mod pack;

pub use interpreter::{run, ScriptOutcome};
pub use pack::pack;

use crate::common::{Error, Result};

/// One scripted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Bytes sent or expected verbatim
    Literal(Vec<u8>),
    /// A binary record packed from integer fields
    Packed {
        format: String,
        values: Vec<i64>,
        bytes: Vec<u8>,
    },
    /// The peer must close or reset the connection here
    ExpectDrop,
}

impl ScriptStep {
    pub fn literal(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Literal(bytes.into())
    }

    /// Pack `values` with `format`, rejecting bad formats up front
    pub fn packed(values: &[i64], format: &str) -> Result<Self> {
        let bytes = pack(format, values)?;
        Ok(Self::Packed {
            format: format.to_string(),
            values: values.to_vec(),
            bytes,
        })
    }

    /// Wire bytes for this step; `None` for [`ScriptStep::ExpectDrop`]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Literal(bytes) => Some(bytes),
            Self::Packed { bytes, .. } => Some(bytes),
            Self::ExpectDrop => None,
        }
    }
}

/// Validated sequence of steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new(steps: Vec<ScriptStep>) -> Result<Self> {
        if let Some(pos) = steps.iter().position(|s| *s == ScriptStep::ExpectDrop) {
            if pos + 1 != steps.len() {
                return Err(Error::Script(format!(
                    "expected drop at step {} is followed by {} more step(s)",
                    pos + 1,
                    steps.len() - pos - 1
                )));
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True when the script ends by expecting the peer to hang up
    pub fn expects_drop(&self) -> bool {
        self.steps.last() == Some(&ScriptStep::ExpectDrop)
    }
}
