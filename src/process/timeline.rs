//! Timeline replay tool
//!
//! The replay tool plays a scripted two-way conversation, either entirely
//! in-process (to produce a reference transcript) or across a proxy chain
//! given its entry and exit addresses. Its transcript goes to stdout.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::common::{Error, HarnessConfig, Result};
use crate::report::Report;

use super::ProxyProcess;

/// One run of the timeline replay tool
pub struct TimelineTester {
    process: ProxyProcess,
    deadline: Duration,
}

impl TimelineTester {
    /// Start the configured replay tool on `script`
    ///
    /// Without `addrs` the tool runs in internal mode; with them it connects
    /// to the entry address and listens on the exit address.
    pub fn launch(
        config: &HarnessConfig,
        script: &Path,
        addrs: Option<(SocketAddr, SocketAddr)>,
    ) -> Result<Self> {
        let program = config.timeline_program()?;
        Self::start(
            &program,
            script,
            addrs,
            config.timeouts.timeline(),
            config.timeouts.kill_grace(),
        )
    }

    pub fn start(
        program: &Path,
        script: &Path,
        addrs: Option<(SocketAddr, SocketAddr)>,
        deadline: Duration,
        kill_grace: Duration,
    ) -> Result<Self> {
        let mut argv = vec![script.display().to_string()];
        if let Some((entry, exit)) = addrs {
            argv.push(entry.to_string());
            argv.push(exit.to_string());
        }
        let process = ProxyProcess::start(program, argv, kill_grace)?;
        Ok(Self { process, deadline })
    }

    /// Wait for the tool to finish and return its transcript
    ///
    /// A nonzero exit, a signal, or a severe diagnostic on stderr turns
    /// into an assertion error carrying the labeled report.
    pub async fn check_completion(&mut self, label: &str) -> Result<Vec<u8>> {
        let done = self
            .process
            .finish(false, self.deadline)
            .await
            .ok_or_else(|| Error::Internal(format!("{} was already checked", label)))?;

        let mut report = Report::new();
        done.report_exit(label, &mut report);
        done.report_stderr(label, false, &mut report);
        if report.is_clean() {
            Ok(done.stdout)
        } else {
            Err(Error::TestAssertion(format!("\n{}", report)))
        }
    }
}
