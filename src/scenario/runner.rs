//! Scenario runner
//!
//! Starts the capture worker and proxy processes a scenario needs, drives
//! the transfer, and always tears everything down again. Failures of any
//! kind end up as text in the scenario's report; nothing here panics or
//! returns early without reaping what it started.

use std::error::Error as _;
use std::path::Path;

use crate::capture::{CaptureWorker, Captured};
use crate::common::{Error, HarnessConfig, Result};
use crate::fixture::TEST_FILE;
use crate::net;
use crate::process::{ProxyProcess, TimelineTester};
use crate::report::{self, Report};
use crate::script::{self, Script, ScriptOutcome};

use super::{Scenario, ScenarioKind, ScenarioResult};

const TRANSFER_LABEL: &str = "errors in transfer:";

/// Run one scenario to completion
pub async fn run_scenario(config: &HarnessConfig, scenario: &Scenario) -> ScenarioResult {
    tracing::info!(scenario = %scenario.name, "Running scenario");

    let report = match &scenario.kind {
        ScenarioKind::Direct { args } => run_direct(config, args).await,
        ScenarioKind::Socks {
            client_args,
            server_args,
            script,
        } => run_socks(config, client_args, server_args.as_deref(), script).await,
        ScenarioKind::Timeline {
            script_file,
            proxy_args,
        } => run_timeline(config, script_file, proxy_args).await,
    };

    let passed = report.is_clean();
    if passed {
        tracing::info!(scenario = %scenario.name, "Scenario passed");
    } else {
        tracing::info!(scenario = %scenario.name, "Scenario failed");
    }
    ScenarioResult {
        name: scenario.name.clone(),
        passed,
        report: report.into_string(),
    }
}

/// Everything a scenario started, in report order
#[derive(Default)]
struct Rig {
    capture: Option<CaptureWorker>,
    processes: Vec<(&'static str, ProxyProcess)>,
}

impl Rig {
    fn launch(&mut self, config: &HarnessConfig, label: &'static str, args: &[String]) -> Result<()> {
        let process = ProxyProcess::launch(config, args)?;
        tracing::info!(
            label,
            program = %process.program().display(),
            argv = ?process.argv(),
            "Launched proxy"
        );
        self.processes.push((label, process));
        Ok(())
    }

    /// Collect every process's report after `report`, then tear down
    ///
    /// Stderr is forced into the reports when `report` already holds a
    /// failure. Processes stop in reverse start order, the capture last.
    async fn finish(mut self, mut report: Report) -> Report {
        let force_stderr = !report.is_clean();
        for (label, process) in self.processes.iter_mut() {
            report.append(process.check_completion(*label, force_stderr).await);
        }

        for (_, process) in self.processes.iter_mut().rev() {
            process.stop().await;
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.stop().await;
        }
        report
    }
}

async fn run_direct(config: &HarnessConfig, args: &[String]) -> Report {
    let mut rig = Rig::default();
    let mut report = Report::new();

    let setup = async {
        rig.capture = Some(CaptureWorker::start(config.ports.exit_addr(), &config.timeouts)?);
        rig.launch(config, "proxy", args)
    }
    .await;
    if let Err(e) = setup {
        report.push_text(&describe(&e));
        return rig.finish(report).await;
    }

    let transfer = async {
        let mut conn = net::connect(config.ports.entry_addr(), &config.timeouts).await?;
        let limit = config.timeouts.socket();
        net::send_all(&mut conn, TEST_FILE, limit).await?;
        net::half_close(&mut conn).await?;
        let captured = match rig.capture.as_mut() {
            Some(capture) => capture.get().await,
            None => return Err(Error::Internal("capture worker missing".to_string())),
        };
        Ok::<_, Error>((conn, captured))
    }
    .await;

    // The entry connection stays open until the proxy has been checked.
    let _entry = match transfer {
        Ok((conn, captured)) => {
            report.append(transfer_diff(&captured, config));
            Some(conn)
        }
        Err(e) => {
            report.push_text(&describe(&e));
            None
        }
    };
    rig.finish(report).await
}

async fn run_socks(
    config: &HarnessConfig,
    client_args: &[String],
    server_args: Option<&[String]>,
    script: &Script,
) -> Report {
    let mut rig = Rig::default();
    let mut report = Report::new();

    // The server side starts first so it is listening by the time the
    // client proxy forwards the first CONNECT.
    let mut server = None;
    let setup = async {
        if let Some(args) = server_args {
            rig.capture = Some(CaptureWorker::start(config.ports.exit_addr(), &config.timeouts)?);
            let process = ProxyProcess::launch(config, args)?;
            tracing::info!(
                label = "proxy server",
                program = %process.program().display(),
                argv = ?process.argv(),
                "Launched proxy"
            );
            server = Some(process);
        }
        rig.launch(config, "proxy client", client_args)
    }
    .await;
    // Reports list the client before the server.
    if let Some(server) = server {
        rig.processes.push(("proxy server", server));
    }
    if let Err(e) = setup {
        report.push_text(&describe(&e));
        return rig.finish(report).await;
    }

    let outcome = async {
        let mut conn = net::connect(config.ports.entry_addr(), &config.timeouts).await?;
        script::run(
            script,
            &mut conn,
            TEST_FILE,
            rig.capture.as_mut(),
            config.timeouts.socket(),
        )
        .await
    }
    .await;

    match outcome {
        Ok(ScriptOutcome::Transferred(captured)) => report.append(transfer_diff(&captured, config)),
        Ok(ScriptOutcome::Dropped) => {}
        Err(e) => report.push_text(&describe(&e)),
    }
    rig.finish(report).await
}

async fn run_timeline(config: &HarnessConfig, script_file: &Path, proxy_args: &[String]) -> Report {
    let mut report = Report::new();

    let reference = async {
        TimelineTester::launch(config, script_file, None)?
            .check_completion("timeline reference")
            .await
    }
    .await;
    let reference = match reference {
        Ok(transcript) => transcript,
        Err(e) => {
            report.push_text("reference run failed:\n");
            report.push_text(&describe(&e));
            return report;
        }
    };

    let mut rig = Rig::default();
    if let Err(e) = rig.launch(config, "proxy", proxy_args) {
        report.push_text(&describe(&e));
        return rig.finish(report).await;
    }

    let transcript = async {
        let addrs = (config.ports.entry_addr(), config.ports.exit_addr());
        TimelineTester::launch(config, script_file, Some(addrs))?
            .check_completion("tester")
            .await
    }
    .await;

    match transcript {
        Ok(transcript) => report.append(report::diff(TRANSFER_LABEL, &reference, &transcript)),
        Err(e) => report.push_text(&describe(&e)),
    }
    rig.finish(report).await
}

/// Compare the captured exit-side bytes with the test file
fn transfer_diff(captured: &Captured, config: &HarnessConfig) -> Report {
    let mut report = report::diff(TRANSFER_LABEL, TEST_FILE, &captured.data);
    if !captured.finished {
        report.push_line(
            "exit capture",
            &format!(
                "still running after {} ms; data may be incomplete",
                config.timeouts.capture_join_ms
            ),
        );
    }
    report
}

/// Render an error and its causes as report text
fn describe(err: &Error) -> String {
    if let Error::TestAssertion(text) = err {
        let text = text.trim_start_matches('\n');
        return if text.ends_with('\n') {
            text.to_string()
        } else {
            format!("{}\n", text)
        };
    }

    let mut text = format!("{}\n", err);
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(&format!("  caused by: {}\n", cause));
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Ports;

    #[test]
    fn test_describe_assertion_is_verbatim() {
        let err = Error::TestAssertion("\ntester exit code: 1\n".to_string());
        assert_eq!(describe(&err), "tester exit code: 1\n");
    }

    #[test]
    fn test_describe_includes_causes() {
        let err = Error::process_spawn(
            "./obfsproxy",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        let text = describe(&err);
        assert!(text.starts_with("Failed to start './obfsproxy'"));
        assert!(text.contains("caused by: no such file"));
    }

    #[test]
    fn test_unfinished_capture_is_called_out() {
        let config = HarnessConfig::default();
        let captured = Captured {
            data: Vec::new(),
            finished: false,
        };
        let report = transfer_diff(&captured, &config);
        assert!(report.as_str().starts_with(TRANSFER_LABEL));
        assert!(report.as_str().contains("exit capture still running"));
    }

    #[test]
    fn test_matching_capture_is_clean() {
        let config = HarnessConfig::default();
        let captured = Captured {
            data: TEST_FILE.to_vec(),
            finished: true,
        };
        assert!(transfer_diff(&captured, &config).is_clean());
    }

    #[tokio::test]
    async fn test_missing_program_fails_without_panicking() {
        let mut config = HarnessConfig::default();
        config.proxy.program = "/nonexistent/proxy-under-test".into();
        config.ports = Ports::block(23100).unwrap();
        let scenario = Scenario::new(
            "direct_missing",
            ScenarioKind::Direct {
                args: vec!["dummy".to_string()],
            },
        );
        let result = run_scenario(&config, &scenario).await;
        assert!(!result.passed);
        assert!(result.report.contains("Failed to start"));
    }
}
