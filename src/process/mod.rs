//! Lifecycle control for external processes under test
//!
//! A [`ProxyProcess`] owns one launched binary from spawn to reap. Its
//! stdout and stderr are drained by background tasks from the start, so a
//! chatty process can never block on a full pipe. Completion is checked by
//! interrupting the process, giving it a grace period, and killing it if it
//! has not exited by then.

mod timeline;

pub use timeline::TimelineTester;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::common::{Error, HarnessConfig, Result};
use crate::report::{indent, Report};

/// Where a process is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    SignalSent,
    Reaped,
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    /// Normal exit with this code
    Code(i32),
    /// Terminated by this signal number
    Signal(i32),
    /// The status could not be collected
    Unknown(String),
}

impl ExitState {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown(status.to_string())
    }

    /// Signed exit code: positive for an exit code, negative for a signal
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            Self::Signal(signal) => Some(-signal),
            Self::Unknown(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Code(0)
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code: {}", code),
            Self::Signal(signal) => write!(f, "killed: signal {}", signal),
            Self::Unknown(reason) => write!(f, "exit status unknown: {}", reason),
        }
    }
}

/// Everything collected from a process once it has been reaped
#[derive(Debug, Clone)]
pub struct Completion {
    pub exit: ExitState,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Completion {
    /// Report a nonzero exit or a signal
    pub fn report_exit(&self, label: &str, report: &mut Report) {
        if !self.exit.is_success() {
            report.push_line(label, &self.exit.to_string());
        }
    }

    /// Report anything written to stdout
    pub fn report_stdout(&self, label: &str, report: &mut Report) {
        if !self.stdout.is_empty() {
            let out = String::from_utf8_lossy(&self.stdout);
            report.push_line(label, &format!("stdout:\n{}", indent(&out)));
        }
    }

    /// Report stderr when forced, when it carries a severe diagnostic, or
    /// when the exit was abnormal
    pub fn report_stderr(&self, label: &str, force: bool, report: &mut Report) {
        if force || self.has_severe_diagnostic() || !self.exit.is_success() {
            let err = String::from_utf8_lossy(&self.stderr);
            report.push_line(label, &format!("stderr:\n{}", indent(&err)));
        }
    }

    /// True when stderr contains a `[warn]`, `[err]`, or `[error]` tag
    pub fn has_severe_diagnostic(&self) -> bool {
        let err = String::from_utf8_lossy(&self.stderr);
        ["[warn]", "[err]", "[error]"]
            .iter()
            .any(|marker| err.contains(marker))
    }
}

/// A launched proxy (or other tool) with captured output
pub struct ProxyProcess {
    program: PathBuf,
    argv: Vec<String>,
    child: Child,
    pid: Option<u32>,
    state: ProcessState,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    kill_grace: Duration,
}

impl ProxyProcess {
    /// Launch the configured proxy with its fixed flags followed by `args`
    pub fn launch(config: &HarnessConfig, args: &[String]) -> Result<Self> {
        let program = config.proxy_program()?;
        let argv: Vec<String> = config
            .proxy
            .fixed_args
            .iter()
            .chain(args.iter())
            .cloned()
            .collect();
        Self::start(&program, argv, config.timeouts.kill_grace())
    }

    /// Launch `program` with `argv`, stdin empty and both outputs captured
    ///
    /// The process gets its own process group so the interrupt sent to it
    /// never reaches the harness.
    pub fn start(program: &Path, argv: Vec<String>, kill_grace: Duration) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::process_spawn(&program.display().to_string(), e))?;

        let pid = child.id();
        let stdout = child.stdout.take().map(drain_pipe);
        let stderr = child.stderr.take().map(drain_pipe);

        tracing::debug!(program = %program.display(), ?argv, ?pid, "Started process");

        Ok(Self {
            program: program.to_path_buf(),
            argv,
            child,
            pid,
            state: ProcessState::Running,
            stdout,
            stderr,
            kill_grace,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Shut the process down and report anything it did wrong
    ///
    /// Interrupts the process if it is still running, kills it if it has
    /// not exited after the grace period, then reports: a nonzero exit or
    /// signal, any stdout at all, and stderr when `force_stderr` is set,
    /// when it carries a severe diagnostic, or when the exit was abnormal.
    /// Once the process has been reaped this returns an empty report.
    pub async fn check_completion(&mut self, label: &str, force_stderr: bool) -> Report {
        let mut report = Report::new();
        let grace = self.kill_grace;
        if let Some(done) = self.finish(true, grace).await {
            done.report_exit(label, &mut report);
            done.report_stdout(label, &mut report);
            done.report_stderr(label, force_stderr, &mut report);
        }
        report
    }

    /// Kill the process if it is still around; used during teardown
    pub async fn stop(&mut self) {
        if self.state == ProcessState::Reaped {
            return;
        }
        if matches!(self.child.try_wait(), Ok(None)) {
            self.force_kill();
        }
        match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
            Ok(_) => self.state = ProcessState::Reaped,
            Err(_) => tracing::warn!(pid = ?self.pid, "Process still running after kill"),
        }
    }

    /// Wait for the process, optionally interrupting it first, and collect
    /// its output. Returns `None` if it was already reaped.
    pub(crate) async fn finish(&mut self, interrupt: bool, deadline: Duration) -> Option<Completion> {
        if self.state == ProcessState::Reaped {
            return None;
        }

        if interrupt && matches!(self.child.try_wait(), Ok(None)) {
            self.interrupt();
            self.state = ProcessState::SignalSent;
        }

        let exit = self.wait_with_deadline(deadline).await;
        self.state = ProcessState::Reaped;

        let stdout = collect(self.stdout.take(), self.kill_grace).await;
        let stderr = collect(self.stderr.take(), self.kill_grace).await;

        tracing::debug!(program = %self.program.display(), %exit, "Process reaped");
        Some(Completion {
            exit,
            stdout,
            stderr,
        })
    }

    async fn wait_with_deadline(&mut self, deadline: Duration) -> ExitState {
        tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) => return ExitState::from_status(status),
                Err(e) => tracing::warn!(pid = ?self.pid, error = %e, "Wait failed, killing process"),
            },
            _ = tokio::time::sleep(deadline) => {
                tracing::info!(
                    pid = ?self.pid,
                    deadline_ms = deadline.as_millis() as u64,
                    "Process did not exit in time, killing it"
                );
            }
        }

        self.force_kill();
        match self.child.wait().await {
            Ok(status) => ExitState::from_status(status),
            Err(e) => ExitState::Unknown(e.to_string()),
        }
    }

    #[cfg(unix)]
    fn interrupt(&mut self) {
        let Some(pid) = self.pid else { return };
        tracing::debug!(pid, "Sending SIGINT");
        // SAFETY: plain signal delivery to a child we spawned and have not reaped.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            tracing::warn!(
                pid,
                error = %std::io::Error::last_os_error(),
                "Failed to send SIGINT"
            );
        }
    }

    /// Without signals this is a hard termination, so the process never
    /// gets to shut down on its own and is always reported as killed.
    #[cfg(not(unix))]
    fn interrupt(&mut self) {
        tracing::debug!(pid = ?self.pid, "Requesting termination");
        if let Err(e) = self.child.start_kill() {
            tracing::warn!(pid = ?self.pid, error = %e, "Failed to terminate process");
        }
    }

    /// Kill the whole process group so helpers holding our pipes die too
    fn force_kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // SAFETY: the child leads its own process group (process_group(0)).
            if unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) } == 0 {
                return;
            }
        }
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "Kill failed, process already gone");
        }
    }
}

impl Drop for ProxyProcess {
    fn drop(&mut self) {
        // Best effort: we cannot await in drop.
        if self.state != ProcessState::Reaped {
            self.force_kill();
        }
    }
}

fn drain_pipe<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Pipe read ended with error");
        }
        buf
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>, limit: Duration) -> Vec<u8> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("Output pipe still open after process exit");
            Vec::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(1000);

    fn sh(script: &str) -> ProxyProcess {
        ProxyProcess::start(
            Path::new("/bin/sh"),
            vec!["-c".to_string(), script.to_string()],
            GRACE,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_clean_exit_reports_nothing() {
        let mut proc = sh("echo '[debug] starting' >&2; exit 0");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = proc.check_completion("proxy", false).await;
        assert!(report.is_clean(), "unexpected report: {report}");
        assert_eq!(proc.state(), ProcessState::Reaped);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_code_and_stderr() {
        let mut proc = sh("echo 'bad flag' >&2; exit 3");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = proc.check_completion("proxy", false).await;
        assert_eq!(report.as_str(), "proxy exit code: 3\nproxy stderr:\n| bad flag\n");
    }

    #[tokio::test]
    async fn test_stdout_is_always_reported() {
        let mut proc = sh("echo hello; echo '[info] ok' >&2");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = proc.check_completion("proxy", false).await;
        assert_eq!(report.as_str(), "proxy stdout:\n| hello\n");
    }

    #[tokio::test]
    async fn test_severe_stderr_is_reported() {
        let mut proc = sh("echo '[warn] listener lost' >&2");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = proc.check_completion("proxy", false).await;
        assert_eq!(report.as_str(), "proxy stderr:\n| [warn] listener lost\n");
    }

    #[tokio::test]
    async fn test_forced_stderr() {
        let mut proc = sh("echo '[debug] fine' >&2");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let report = proc.check_completion("proxy client", true).await;
        assert_eq!(report.as_str(), "proxy client stderr:\n| [debug] fine\n");
    }

    #[tokio::test]
    async fn test_interrupt_stops_running_process() {
        let mut proc = sh("exec sleep 30");
        let started = std::time::Instant::now();
        let report = proc.check_completion("proxy", false).await;
        assert!(started.elapsed() < GRACE);
        assert!(report.as_str().starts_with("proxy killed: signal 2\n"));
    }

    #[tokio::test]
    async fn test_ignored_interrupt_is_killed_after_grace() {
        let mut proc = sh("trap '' INT; exec sleep 30");
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = std::time::Instant::now();
        let report = proc.check_completion("proxy", false).await;
        assert!(started.elapsed() >= GRACE);
        assert!(report.as_str().starts_with("proxy killed: signal 9\n"));
    }

    #[tokio::test]
    async fn test_second_check_is_empty() {
        let mut proc = sh("exit 4");
        let first = proc.check_completion("proxy", false).await;
        assert!(!first.is_clean());
        let second = proc.check_completion("proxy", true).await;
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_launch_prepends_fixed_args() {
        let mut config = HarnessConfig::default();
        config.proxy.program = "/bin/sh".into();
        config.proxy.fixed_args = vec!["-c".to_string(), "exit 0".to_string()];
        let mut proc = ProxyProcess::launch(&config, &["dummy".to_string()]).unwrap();
        assert_eq!(proc.program(), Path::new("/bin/sh"));
        assert_eq!(proc.argv(), ["-c", "exit 0", "dummy"]);
        assert!(proc.check_completion("proxy", false).await.is_clean());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = ProxyProcess::start(Path::new("/nonexistent/obfsproxy"), Vec::new(), GRACE)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ProcessSpawn { .. }));
    }

    #[test]
    fn test_exit_state_codes() {
        assert_eq!(ExitState::Code(3).code(), Some(3));
        assert_eq!(ExitState::Signal(9).code(), Some(-9));
        assert_eq!(ExitState::Unknown("x".into()).code(), None);
        assert_eq!(ExitState::Signal(2).to_string(), "killed: signal 2");
    }
}
